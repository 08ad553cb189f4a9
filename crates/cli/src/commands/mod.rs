pub mod config;
pub mod doctor;
pub mod duplicate;
pub mod history;
pub mod migrate;
pub mod sweep;
pub mod transition;

use std::sync::Arc;

use quoteflow_core::audit::TracingAuditSink;
use quoteflow_core::config::{AppConfig, LoadOptions};
use quoteflow_core::lifecycle::{
    DisabledPdfGenerator, NoopNotifier, SideEffectDispatcher, TransitionEngine,
};
use quoteflow_core::{InterfaceError, QuoteStatus, SystemClock};
use quoteflow_db::{connect_with_config, migrations, DbPool, SqlQuoteStore};
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::ok(command, message.into(), None)
    }

    /// Success carrying a structured result under `data`.
    pub fn success_with(command: &str, message: impl Into<String>, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::ok(command, message.into(), Some(value)),
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    fn ok(command: &str, message: String, data: Option<serde_json::Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Maps an engine failure onto the operator-facing error classes.
    pub fn from_interface(command: &str, error: InterfaceError) -> Self {
        let (error_class, exit_code) = match &error {
            InterfaceError::Unprocessable { .. } => ("unprocessable", 7),
            InterfaceError::NotFound { .. } => ("not_found", 8),
            InterfaceError::Conflict { .. } => ("conflict", 9),
            InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 10),
            InterfaceError::Internal { .. } => ("internal", 11),
        };
        let message = match &error {
            InterfaceError::Unprocessable { allowed_next, .. } if !allowed_next.is_empty() => {
                let allowed: Vec<&str> = allowed_next.iter().map(QuoteStatus::as_str).collect();
                format!("{error} (allowed next: {})", allowed.join(", "))
            }
            _ => error.to_string(),
        };
        Self::failure(command, error_class, message, exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        let message = format!("configuration issue: {error}");
        CommandResult::failure(command, "config_validation", message, 2)
    })
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects and applies pending migrations so lifecycle commands work on a
/// fresh database file.
pub(crate) async fn open_pool(command: &str, config: &AppConfig) -> Result<DbPool, CommandResult> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| CommandResult::failure(command, "db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandResult::failure(command, "migration", error.to_string(), 5))?;
    Ok(pool)
}

pub(crate) type CliEngine = TransitionEngine<SqlQuoteStore, SystemClock>;

/// Engine for one CLI invocation. Snapshots and client notifications belong
/// to the server process, so only audit events are dispatched here.
pub(crate) fn engine(pool: &DbPool, config: &AppConfig) -> (Arc<CliEngine>, JoinHandle<()>) {
    let dispatcher = SideEffectDispatcher::new(
        Arc::new(DisabledPdfGenerator),
        Arc::new(NoopNotifier),
        Arc::new(TracingAuditSink),
    );
    let (events, worker) = dispatcher.spawn(config.dispatcher.queue_capacity);
    let store = Arc::new(SqlQuoteStore::new(pool.clone()));
    let engine = TransitionEngine::new(store, SystemClock)
        .with_settings(config.lifecycle.settings())
        .with_events(Arc::new(events));
    (Arc::new(engine), worker)
}

/// Drops the engine so the dispatch queue closes, then waits for the worker.
pub(crate) async fn finish(engine: Arc<CliEngine>, worker: JoinHandle<()>, pool: DbPool) {
    drop(engine);
    if let Err(error) = worker.await {
        warn_worker_failed(&error);
    }
    pool.close().await;
}

fn warn_worker_failed(error: &JoinError) {
    tracing::warn!(
        event_name = "dispatch.worker.failed",
        correlation_id = "cli",
        panicked = error.is_panic(),
        error = %error,
        "side-effect dispatcher ended abnormally"
    );
}
