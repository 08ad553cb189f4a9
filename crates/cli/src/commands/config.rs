use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use quoteflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source =
            field_source(key, &[env_key], config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    for (key, value, env_keys) in [
        (
            "logging.level",
            config.logging.level.clone(),
            ["QUOTEFLOW_LOGGING_LEVEL", "QUOTEFLOW_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            ["QUOTEFLOW_LOGGING_FORMAT", "QUOTEFLOW_LOG_FORMAT"],
        ),
    ] {
        let source =
            field_source(key, &env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let optional_path = |path: &Option<PathBuf>| {
        path.as_ref().map(|path| path.display().to_string()).unwrap_or_else(|| "<unset>".into())
    };
    let webhook_token = match &config.notifier.webhook_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        ("database.url", config.database.url.clone(), "QUOTEFLOW_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "QUOTEFLOW_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "QUOTEFLOW_DATABASE_TIMEOUT_SECS",
        ),
        (
            "lifecycle.default_validity_days",
            config.lifecycle.default_validity_days.to_string(),
            "QUOTEFLOW_LIFECYCLE_DEFAULT_VALIDITY_DAYS",
        ),
        (
            "lifecycle.quote_number_prefix",
            config.lifecycle.quote_number_prefix.clone(),
            "QUOTEFLOW_LIFECYCLE_QUOTE_NUMBER_PREFIX",
        ),
        ("sweeper.enabled", config.sweeper.enabled.to_string(), "QUOTEFLOW_SWEEPER_ENABLED"),
        (
            "sweeper.interval_secs",
            config.sweeper.interval_secs.to_string(),
            "QUOTEFLOW_SWEEPER_INTERVAL_SECS",
        ),
        ("sweeper.policy", format!("{:?}", config.sweeper.policy), "QUOTEFLOW_SWEEPER_POLICY"),
        (
            "sweeper.older_than_days",
            config.sweeper.older_than_days.to_string(),
            "QUOTEFLOW_SWEEPER_OLDER_THAN_DAYS",
        ),
        (
            "dispatcher.queue_capacity",
            config.dispatcher.queue_capacity.to_string(),
            "QUOTEFLOW_DISPATCHER_QUEUE_CAPACITY",
        ),
        ("pdf.enabled", config.pdf.enabled.to_string(), "QUOTEFLOW_PDF_ENABLED"),
        ("pdf.template", optional_path(&config.pdf.template), "QUOTEFLOW_PDF_TEMPLATE"),
        (
            "pdf.output_dir",
            config.pdf.output_dir.display().to_string(),
            "QUOTEFLOW_PDF_OUTPUT_DIR",
        ),
        (
            "notifier.webhook_url",
            config.notifier.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "QUOTEFLOW_NOTIFIER_WEBHOOK_URL",
        ),
        ("notifier.webhook_token", webhook_token, "QUOTEFLOW_NOTIFIER_WEBHOOK_TOKEN"),
        (
            "notifier.timeout_secs",
            config.notifier.timeout_secs.to_string(),
            "QUOTEFLOW_NOTIFIER_TIMEOUT_SECS",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "QUOTEFLOW_SERVER_BIND_ADDRESS",
        ),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "QUOTEFLOW_SERVER_HEALTH_CHECK_PORT",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "QUOTEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["quoteflow.toml", "config/quoteflow.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
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

/// Keeps a short prefix so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    if trimmed.chars().count() > 8 {
        return format!("{prefix}***");
    }

    "<redacted>".to_string()
}
