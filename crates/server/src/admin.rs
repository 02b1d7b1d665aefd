use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::approval::{correlation_id, ApiError, ApprovalState};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_ACTOR: &str = "admin-api";

/// Proof that the caller presented the configured admin key. Routes that change the
/// ladder or create requests take this as their first extractor.
#[derive(Debug, Clone, Copy)]
pub struct AdminCaller;

#[derive(Debug, PartialEq, Eq)]
enum KeyCheck {
    Accepted,
    Missing,
    Wrong,
    Disabled,
}

impl FromRequestParts<ApprovalState> for AdminCaller {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApprovalState,
    ) -> Result<Self, Self::Rejection> {
        let check = check_key(state.admin_api_key.as_ref(), presented_key(&parts.headers));
        if check == KeyCheck::Accepted {
            return Ok(AdminCaller);
        }

        let cid = correlation_id(&parts.headers);
        let (status, message) = match check {
            KeyCheck::Missing => (StatusCode::UNAUTHORIZED, "an admin API key is required"),
            KeyCheck::Wrong => (StatusCode::FORBIDDEN, "the admin API key is not valid"),
            KeyCheck::Disabled | KeyCheck::Accepted => {
                (StatusCode::FORBIDDEN, "admin routes are disabled on this server")
            }
        };
        warn!(
            event_name = "approval.api.admin_refused",
            correlation_id = %cid,
            path = %parts.uri.path(),
            status = status.as_u16(),
            "admin route refused"
        );
        Err((status, Json(ApiError { error: message.to_string(), correlation_id: cid })))
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let from_header = headers.get(API_KEY_HEADER).and_then(|value| value.to_str().ok());
    let from_bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    from_header.or(from_bearer).map(str::trim).filter(|key| !key.is_empty())
}

fn check_key(configured: Option<&SecretString>, presented: Option<&str>) -> KeyCheck {
    let Some(configured) = configured else {
        return KeyCheck::Disabled;
    };
    let Some(presented) = presented else {
        return KeyCheck::Missing;
    };
    if keys_match(configured.expose_secret().trim().as_bytes(), presented.as_bytes()) {
        KeyCheck::Accepted
    } else {
        KeyCheck::Wrong
    }
}

/// Compares without an early exit on the first differing byte.
fn keys_match(expected: &[u8], presented: &[u8]) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected.iter().zip(presented).fold(0_u8, |diff, (a, b)| diff | (a ^ b)) == 0
}
