use std::sync::Arc;

use quoteflow_core::audit::TracingAuditSink;
use quoteflow_core::config::{AppConfig, ConfigError, LoadOptions};
use quoteflow_core::lifecycle::{
    DisabledPdfGenerator, NoopNotifier, Notifier, PdfGenerator, SideEffectDispatcher,
    TransitionEngine,
};
use quoteflow_core::SystemClock;
use quoteflow_db::{connect_with_config, migrations, DbPool, SqlQuoteStore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::notifier::WebhookNotifier;
use crate::pdf::{PdfError, TeraPdfGenerator};
use crate::scheduler::SweepScheduler;

pub type QuoteEngine = TransitionEngine<SqlQuoteStore, SystemClock>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<QuoteEngine>,
    /// Ends once every engine handle, and with it the dispatch queue sender,
    /// has been dropped.
    pub dispatcher: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("pdf generator setup failed: {0}")]
    Pdf(#[from] PdfError),
    #[error("webhook client setup failed: {0}")]
    Notifier(#[source] reqwest::Error),
}

impl Application {
    pub fn scheduler(&self) -> Option<SweepScheduler<SqlQuoteStore, SystemClock>> {
        self.config
            .sweeper
            .enabled
            .then(|| SweepScheduler::new(Arc::clone(&self.engine), &self.config.sweeper))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let pdf: Arc<dyn PdfGenerator> = if config.pdf.enabled {
        Arc::new(TeraPdfGenerator::from_config(&config.pdf)?)
    } else {
        Arc::new(DisabledPdfGenerator)
    };
    let notifier: Arc<dyn Notifier> =
        match WebhookNotifier::from_config(&config.notifier).map_err(BootstrapError::Notifier)? {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(NoopNotifier),
        };
    let (events, dispatcher) = SideEffectDispatcher::new(pdf, notifier, Arc::new(TracingAuditSink))
        .spawn(config.dispatcher.queue_capacity);

    let store = Arc::new(SqlQuoteStore::new(db_pool.clone()));
    let engine = Arc::new(
        TransitionEngine::new(store, SystemClock)
            .with_settings(config.lifecycle.settings())
            .with_events(Arc::new(events)),
    );
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        pdf_enabled = config.pdf.enabled,
        webhook_configured = config.notifier.webhook_url.is_some(),
        queue_capacity = config.dispatcher.queue_capacity,
        "transition engine and side-effect dispatcher ready"
    );

    Ok(Application { config, db_pool, engine, dispatcher })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use quoteflow_core::config::{ConfigOverrides, LoadOptions};
    use quoteflow_core::lifecycle::TransitionRequest;
    use quoteflow_core::{ClientId, CompanyId, Discount, NewQuote, QuoteLine, QuoteStatus};
    use rust_decimal::Decimal;

    use crate::bootstrap::bootstrap;

    fn options(dir: &std::path::Path) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(format!(
                    "sqlite://{}?mode=rwc",
                    dir.join("quoteflow.db").display()
                )),
                pdf_output_dir: Some(dir.join("snapshots")),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_overrides() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/quotes".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn sent_quote_flows_through_store_and_dispatcher() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(dir.path())).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('quote', 'quote_line', 'quote_status_history')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("lifecycle tables available after bootstrap");
        assert_eq!(table_count, 3);

        let quote = app
            .engine
            .create(
                NewQuote {
                    company_id: CompanyId("acme".to_string()),
                    client_id: ClientId("client-1".to_string()),
                    quote_number: None,
                    quote_date: Utc::now().date_naive(),
                    valid_until: None,
                    lines: vec![QuoteLine {
                        description: "Onboarding".to_string(),
                        quantity: Decimal::from(2),
                        unit_price: Decimal::from(150),
                        tax_rate: Decimal::from(20),
                        product_id: None,
                    }],
                    discount: Discount::None,
                    shipping: Decimal::ZERO,
                },
                None,
            )
            .await
            .expect("create");
        app.engine
            .apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent))
            .await
            .expect("send");

        drop(app.engine);
        tokio::time::timeout(Duration::from_secs(5), app.dispatcher)
            .await
            .expect("dispatcher drains after the engine is dropped")
            .expect("dispatcher task did not panic");

        let snapshots = dir.path().join("snapshots");
        let html = snapshots.join(format!("{}.html", quote.display_number()));
        let pdf = snapshots.join(format!("{}.pdf", quote.display_number()));
        assert!(html.exists() || pdf.exists(), "snapshot written by dispatcher");
        if html.exists() {
            let rendered = std::fs::read_to_string(&html).expect("read snapshot");
            assert!(rendered.contains("360.00"));
        }

        app.db_pool.close().await;
    }
}
