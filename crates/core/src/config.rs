use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::engine::LifecycleSettings;
use crate::lifecycle::store::ExpiryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub lifecycle: LifecycleConfig,
    pub sweeper: SweeperConfig,
    pub dispatcher: DispatcherConfig,
    pub pdf: PdfConfig,
    pub notifier: NotifierConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub default_validity_days: u32,
    pub quote_number_prefix: String,
}

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub policy: SweepPolicyKind,
    pub older_than_days: u32,
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct PdfConfig {
    pub enabled: bool,
    /// Replaces the built-in quote template when set.
    pub template: Option<PathBuf>,
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub webhook_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepPolicyKind {
    ValidUntil,
    OlderThanDays,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub sweeper_enabled: Option<bool>,
    pub sweeper_policy: Option<SweepPolicyKind>,
    pub sweeper_older_than_days: Option<u32>,
    pub pdf_enabled: Option<bool>,
    pub pdf_output_dir: Option<PathBuf>,
    pub notifier_webhook_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://quoteflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            lifecycle: LifecycleConfig {
                default_validity_days: 30,
                quote_number_prefix: "Q".to_string(),
            },
            sweeper: SweeperConfig {
                enabled: true,
                interval_secs: 3_600,
                policy: SweepPolicyKind::ValidUntil,
                older_than_days: 30,
            },
            dispatcher: DispatcherConfig { queue_capacity: 256 },
            pdf: PdfConfig {
                enabled: true,
                template: None,
                output_dir: PathBuf::from("output/quotes"),
            },
            notifier: NotifierConfig { webhook_url: None, webhook_token: None, timeout_secs: 10 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for SweepPolicyKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "valid_until" => Ok(Self::ValidUntil),
            "older_than_days" => Ok(Self::OlderThanDays),
            other => Err(ConfigError::Validation(format!(
                "unsupported sweeper policy `{other}` (expected valid_until|older_than_days)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LifecycleConfig {
    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            default_validity_days: self.default_validity_days,
            quote_number_prefix: self.quote_number_prefix.clone(),
        }
    }
}

impl SweeperConfig {
    pub fn expiry_policy(&self) -> ExpiryPolicy {
        match self.policy {
            SweepPolicyKind::ValidUntil => ExpiryPolicy::ValidUntil,
            SweepPolicyKind::OlderThanDays => ExpiryPolicy::OlderThanDays(self.older_than_days),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("quoteflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(lifecycle) = patch.lifecycle {
            if let Some(default_validity_days) = lifecycle.default_validity_days {
                self.lifecycle.default_validity_days = default_validity_days;
            }
            if let Some(quote_number_prefix) = lifecycle.quote_number_prefix {
                self.lifecycle.quote_number_prefix = quote_number_prefix;
            }
        }

        if let Some(sweeper) = patch.sweeper {
            if let Some(enabled) = sweeper.enabled {
                self.sweeper.enabled = enabled;
            }
            if let Some(interval_secs) = sweeper.interval_secs {
                self.sweeper.interval_secs = interval_secs;
            }
            if let Some(policy) = sweeper.policy {
                self.sweeper.policy = policy;
            }
            if let Some(older_than_days) = sweeper.older_than_days {
                self.sweeper.older_than_days = older_than_days;
            }
        }

        if let Some(dispatcher) = patch.dispatcher {
            if let Some(queue_capacity) = dispatcher.queue_capacity {
                self.dispatcher.queue_capacity = queue_capacity;
            }
        }

        if let Some(pdf) = patch.pdf {
            if let Some(enabled) = pdf.enabled {
                self.pdf.enabled = enabled;
            }
            if let Some(template) = pdf.template {
                self.pdf.template = Some(template);
            }
            if let Some(output_dir) = pdf.output_dir {
                self.pdf.output_dir = output_dir;
            }
        }

        if let Some(notifier) = patch.notifier {
            if let Some(webhook_url) = notifier.webhook_url {
                self.notifier.webhook_url = Some(webhook_url);
            }
            if let Some(webhook_token_value) = notifier.webhook_token {
                self.notifier.webhook_token = Some(secret_value(webhook_token_value));
            }
            if let Some(timeout_secs) = notifier.timeout_secs {
                self.notifier.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("QUOTEFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("QUOTEFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("QUOTEFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("QUOTEFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("QUOTEFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("QUOTEFLOW_LIFECYCLE_DEFAULT_VALIDITY_DAYS") {
            self.lifecycle.default_validity_days =
                parse_u32("QUOTEFLOW_LIFECYCLE_DEFAULT_VALIDITY_DAYS", &value)?;
        }
        if let Some(value) = read_env("QUOTEFLOW_LIFECYCLE_QUOTE_NUMBER_PREFIX") {
            self.lifecycle.quote_number_prefix = value;
        }

        if let Some(value) = read_env("QUOTEFLOW_SWEEPER_ENABLED") {
            self.sweeper.enabled = parse_bool("QUOTEFLOW_SWEEPER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("QUOTEFLOW_SWEEPER_INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_u64("QUOTEFLOW_SWEEPER_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEFLOW_SWEEPER_POLICY") {
            self.sweeper.policy = value.parse()?;
        }
        if let Some(value) = read_env("QUOTEFLOW_SWEEPER_OLDER_THAN_DAYS") {
            self.sweeper.older_than_days =
                parse_u32("QUOTEFLOW_SWEEPER_OLDER_THAN_DAYS", &value)?;
        }

        if let Some(value) = read_env("QUOTEFLOW_DISPATCHER_QUEUE_CAPACITY") {
            self.dispatcher.queue_capacity =
                parse_usize("QUOTEFLOW_DISPATCHER_QUEUE_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("QUOTEFLOW_PDF_ENABLED") {
            self.pdf.enabled = parse_bool("QUOTEFLOW_PDF_ENABLED", &value)?;
        }
        if let Some(value) = read_env("QUOTEFLOW_PDF_TEMPLATE") {
            self.pdf.template = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("QUOTEFLOW_PDF_OUTPUT_DIR") {
            self.pdf.output_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("QUOTEFLOW_NOTIFIER_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(value);
        }
        if let Some(value) = read_env("QUOTEFLOW_NOTIFIER_WEBHOOK_TOKEN") {
            self.notifier.webhook_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("QUOTEFLOW_NOTIFIER_TIMEOUT_SECS") {
            self.notifier.timeout_secs = parse_u64("QUOTEFLOW_NOTIFIER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("QUOTEFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("QUOTEFLOW_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("QUOTEFLOW_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("QUOTEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("QUOTEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("QUOTEFLOW_LOGGING_LEVEL").or_else(|| read_env("QUOTEFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("QUOTEFLOW_LOGGING_FORMAT").or_else(|| read_env("QUOTEFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.sweeper_enabled {
            self.sweeper.enabled = enabled;
        }
        if let Some(policy) = overrides.sweeper_policy {
            self.sweeper.policy = policy;
        }
        if let Some(older_than_days) = overrides.sweeper_older_than_days {
            self.sweeper.older_than_days = older_than_days;
        }
        if let Some(enabled) = overrides.pdf_enabled {
            self.pdf.enabled = enabled;
        }
        if let Some(output_dir) = overrides.pdf_output_dir {
            self.pdf.output_dir = output_dir;
        }
        if let Some(webhook_url) = overrides.notifier_webhook_url {
            self.notifier.webhook_url = Some(webhook_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_lifecycle(&self.lifecycle)?;
        validate_sweeper(&self.sweeper)?;
        validate_dispatcher(&self.dispatcher)?;
        validate_pdf(&self.pdf)?;
        validate_notifier(&self.notifier)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("quoteflow.toml"), PathBuf::from("config/quoteflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_lifecycle(lifecycle: &LifecycleConfig) -> Result<(), ConfigError> {
    if lifecycle.default_validity_days == 0 || lifecycle.default_validity_days > 3_650 {
        return Err(ConfigError::Validation(
            "lifecycle.default_validity_days must be in range 1..=3650".to_string(),
        ));
    }

    let prefix = lifecycle.quote_number_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(
            "lifecycle.quote_number_prefix must be non-empty and alphanumeric (e.g. `Q`)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_sweeper(sweeper: &SweeperConfig) -> Result<(), ConfigError> {
    if sweeper.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sweeper.interval_secs must be greater than zero".to_string(),
        ));
    }

    if sweeper.policy == SweepPolicyKind::OlderThanDays && sweeper.older_than_days == 0 {
        return Err(ConfigError::Validation(
            "sweeper.older_than_days must be greater than zero when policy is older_than_days"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_dispatcher(dispatcher: &DispatcherConfig) -> Result<(), ConfigError> {
    if dispatcher.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "dispatcher.queue_capacity must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_pdf(pdf: &PdfConfig) -> Result<(), ConfigError> {
    if pdf.enabled && pdf.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "pdf.output_dir is required when pdf generation is enabled".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifier(notifier: &NotifierConfig) -> Result<(), ConfigError> {
    if let Some(url) = &notifier.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notifier.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let token_without_url = notifier
        .webhook_token
        .as_ref()
        .map(|token| !token.expose_secret().trim().is_empty())
        .unwrap_or(false)
        && notifier.webhook_url.is_none();
    if token_without_url {
        return Err(ConfigError::Validation(
            "notifier.webhook_token is set but notifier.webhook_url is missing".to_string(),
        ));
    }

    if notifier.timeout_secs == 0 || notifier.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notifier.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    lifecycle: Option<LifecyclePatch>,
    sweeper: Option<SweeperPatch>,
    dispatcher: Option<DispatcherPatch>,
    pdf: Option<PdfPatch>,
    notifier: Option<NotifierPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LifecyclePatch {
    default_validity_days: Option<u32>,
    quote_number_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SweeperPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    policy: Option<SweepPolicyKind>,
    older_than_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatcherPatch {
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PdfPatch {
    enabled: Option<bool>,
    template: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifierPatch {
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
