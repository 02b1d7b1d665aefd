//! Signed, stateless approval links.
//!
//! A token is the base64url (unpadded) encoding of `request_id:level:issued_ms:signature`,
//! where `signature` is the lowercase hex HMAC-SHA256 of everything before it. Tokens minted
//! before levels existed carry only `request_id:issued_ms:signature` and are read as level 1.
//!
//! Verification never consults storage. A token stops being useful either because it is
//! older than [`TOKEN_TTL_DAYS`] or because the step it names has already been acted on.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::request::RequestId;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_TTL_DAYS: i64 = 7;

pub fn token_ttl() -> Duration {
    Duration::days(TOKEN_TTL_DAYS)
}

const SEPARATOR: char = ':';

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("request id `{0}` cannot be encoded into an approval token")]
    UnencodableRequestId(String),
    #[error("approval level must be at least 1")]
    InvalidLevel,
    #[error("token secret cannot be used as an hmac key")]
    InvalidSecret,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFormat {
    /// `request_id:issued_ms:signature`
    Legacy,
    /// `request_id:level:issued_ms:signature`
    Leveled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVerification {
    pub valid: bool,
    pub request_id: Option<RequestId>,
    pub level: Option<u32>,
    pub expired: bool,
}

impl TokenVerification {
    fn invalid() -> Self {
        Self { valid: false, request_id: None, level: None, expired: false }
    }
}

/// Fields recovered from a token whose signature checked out.
#[derive(Clone, Debug, PartialEq, Eq)]
struct DecodedToken {
    format: TokenFormat,
    request_id: String,
    level: u32,
    issued_ms: i64,
}

#[derive(Clone, Debug)]
pub struct TokenCodec {
    secret: SecretString,
}

impl TokenCodec {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn issue(&self, request_id: &RequestId, level: u32) -> Result<String, TokenError> {
        self.issue_at(request_id, level, Utc::now())
    }

    pub fn issue_at(
        &self,
        request_id: &RequestId,
        level: u32,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        if request_id.0.is_empty() || request_id.0.contains(SEPARATOR) {
            return Err(TokenError::UnencodableRequestId(request_id.0.clone()));
        }
        if level == 0 {
            return Err(TokenError::InvalidLevel);
        }

        let payload = format!("{}:{}:{}", request_id.0, level, now.timestamp_millis());
        self.seal(&payload)
    }

    /// Mints a token in the pre-level format. Only single-recipient requests use these.
    pub fn issue_legacy_at(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        if request_id.0.is_empty() || request_id.0.contains(SEPARATOR) {
            return Err(TokenError::UnencodableRequestId(request_id.0.clone()));
        }

        let payload = format!("{}:{}", request_id.0, now.timestamp_millis());
        self.seal(&payload)
    }

    pub fn verify(&self, token: &str) -> TokenVerification {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> TokenVerification {
        let Some(decoded) = self.decode(token) else {
            return TokenVerification::invalid();
        };

        let age_ms = now.timestamp_millis().saturating_sub(decoded.issued_ms);
        let expired = age_ms > token_ttl().num_milliseconds();

        TokenVerification {
            valid: !expired,
            request_id: Some(RequestId(decoded.request_id)),
            level: Some(decoded.level),
            expired,
        }
    }

    /// Reports which layout a correctly signed token uses.
    pub fn format_of(&self, token: &str) -> Option<TokenFormat> {
        self.decode(token).map(|decoded| decoded.format)
    }

    fn seal(&self, payload: &str) -> Result<String, TokenError> {
        let mut mac = self.mac().ok_or(TokenError::InvalidSecret)?;
        mac.update(payload.as_bytes());
        let signature = encode_hex(mac.finalize().into_bytes().as_slice());
        Ok(URL_SAFE_NO_PAD.encode(format!("{payload}{SEPARATOR}{signature}")))
    }

    fn decode(&self, token: &str) -> Option<DecodedToken> {
        let raw = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        let text = String::from_utf8(raw).ok()?;

        // Signature first: nothing about the payload is trusted until it matches.
        let (payload, signature_hex) = text.rsplit_once(SEPARATOR)?;
        let signature = decode_hex(signature_hex)?;
        if !self.signature_matches(payload.as_bytes(), &signature) {
            return None;
        }

        let fields: Vec<&str> = payload.split(SEPARATOR).collect();
        let (format, request_id, level, issued) = match fields.as_slice() {
            [request_id, issued] => (TokenFormat::Legacy, *request_id, 1, *issued),
            [request_id, level, issued] => {
                (TokenFormat::Leveled, *request_id, level.parse::<u32>().ok()?, *issued)
            }
            _ => return None,
        };

        if request_id.is_empty() || level == 0 {
            return None;
        }

        Some(DecodedToken {
            format,
            request_id: request_id.to_string(),
            level,
            issued_ms: issued.parse::<i64>().ok()?,
        })
    }

    fn mac(&self) -> Option<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(self.secret.expose_secret().as_bytes()).ok()
    }

    fn signature_matches(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Some(mut mac) = self.mac() else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 || !raw.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    // Signatures are emitted lowercase; anything else is a different string.
    if raw.bytes().any(|byte| byte.is_ascii_uppercase()) {
        return None;
    }

    (0..raw.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&raw[index..index + 2], 16).ok())
        .collect()
}
