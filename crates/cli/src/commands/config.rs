use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ladder_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: Vec<(&str, String, &[&str])> = vec![
        ("database.url", config.database.url.clone(), &["LADDER_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["LADDER_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["LADDER_DATABASE_TIMEOUT_SECS"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["LADDER_SERVER_BIND_ADDRESS"]),
        ("server.port", config.server.port.to_string(), &["LADDER_SERVER_PORT"]),
        (
            "server.public_base_url",
            config.server.public_base_url.clone(),
            &["LADDER_SERVER_PUBLIC_BASE_URL"],
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["LADDER_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "server.admin_api_key",
            config
                .server
                .admin_api_key
                .as_ref()
                .map(|key| redact_secret(key.expose_secret()))
                .unwrap_or_else(|| "<unset; admin routes disabled>".to_string()),
            &["LADDER_SERVER_ADMIN_API_KEY"],
        ),
        (
            "approval.token_secret",
            redact_secret(config.approval.token_secret.expose_secret()),
            &["LADDER_APPROVAL_TOKEN_SECRET"],
        ),
        (
            "approval.max_levels",
            config.approval.max_levels.to_string(),
            &["LADDER_APPROVAL_MAX_LEVELS"],
        ),
        (
            "notifier.webhook_url",
            config.notifier.webhook_url.as_deref().map(redact_url).unwrap_or_else(unset),
            &["LADDER_NOTIFIER_WEBHOOK_URL"],
        ),
        (
            "notifier.timeout_secs",
            config.notifier.timeout_secs.to_string(),
            &["LADDER_NOTIFIER_TIMEOUT_SECS"],
        ),
        (
            "artifacts.root",
            config
                .artifacts
                .root
                .as_ref()
                .map(|root| root.display().to_string())
                .unwrap_or_else(unset),
            &["LADDER_ARTIFACTS_ROOT"],
        ),
        ("logging.level", config.logging.level.clone(), &["LADDER_LOGGING_LEVEL", "LADDER_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LADDER_LOGGING_FORMAT", "LADDER_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn unset() -> String {
    "<unset>".to_string()
}

fn detect_config_path() -> Option<PathBuf> {
    ["ladder.toml", "config/ladder.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} chars>", secret.chars().count())
}

/// Webhook URLs often carry a key in the path or query; only scheme and host are shown.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<redacted>".to_string();
    };
    let host = rest.split(['/', '?']).next().unwrap_or_default();
    format!("{scheme}://{host}/***")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret, redact_url};

    #[test]
    fn secrets_and_webhook_paths_never_print() {
        assert_eq!(redact_secret(""), "<empty>");
        assert_eq!(redact_secret("0123456789abcdef"), "<redacted, 16 chars>");
        assert_eq!(
            redact_url("https://hooks.example.com/services/T000/B000/XXXX?key=abc"),
            "https://hooks.example.com/***"
        );
    }

    #[test]
    fn nested_keys_are_found_in_config_documents() {
        let doc: Value = "[approval]\nmax_levels = 4\n".parse().expect("toml");
        assert!(contains_path(&doc, "approval.max_levels"));
        assert!(!contains_path(&doc, "approval.token_secret"));
    }
}
