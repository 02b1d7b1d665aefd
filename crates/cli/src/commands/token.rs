use ladder_core::token::{TokenCodec, TokenFormat};
use serde_json::json;

use crate::commands::{load_config, CommandResult};

/// Checks a link token offline. Never touches the database.
pub fn inspect(token: &str) -> CommandResult {
    let config = match load_config("token") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let codec = TokenCodec::new(config.approval.token_secret.clone());
    let verification = codec.verify(token);
    let format = codec.format_of(token).map(|format| match format {
        TokenFormat::Legacy => "legacy",
        TokenFormat::Leveled => "leveled",
    });

    let data = json!({
        "valid": verification.valid,
        "expired": verification.expired,
        "request_id": verification.request_id.as_ref().map(|id| id.0.clone()),
        "level": verification.level,
        "format": format,
    });

    if verification.valid {
        CommandResult::success_with("token", "token signature and window are valid", Some(data))
    } else if verification.expired {
        CommandResult::failure(
            "token",
            "token_expired",
            "token signature is valid but the link has expired",
            6,
        )
    } else {
        CommandResult::failure(
            "token",
            "token_invalid",
            "token is malformed or was not signed with this secret",
            6,
        )
    }
}
