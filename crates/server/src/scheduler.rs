use std::sync::Arc;
use std::time::Duration;

use quoteflow_core::config::SweeperConfig;
use quoteflow_core::lifecycle::{ExpirationSweeper, ExpiryPolicy, QuoteStore, TransitionEngine};
use quoteflow_core::{ApplicationError, Clock, SweepReport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Periodic expiration sweep over all companies.
pub struct SweepScheduler<S, C> {
    engine: Arc<TransitionEngine<S, C>>,
    sweeper: ExpirationSweeper<S, C>,
    interval: Duration,
    policy: ExpiryPolicy,
}

impl<S, C> SweepScheduler<S, C>
where
    S: QuoteStore + 'static,
    C: Clock + 'static,
{
    pub fn new(engine: Arc<TransitionEngine<S, C>>, config: &SweeperConfig) -> Self {
        Self {
            sweeper: ExpirationSweeper::new(Arc::clone(&engine)),
            engine,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            policy: config.expiry_policy(),
        }
    }

    /// One sweep as of today's date on the engine clock.
    pub async fn run_once(&self) -> Result<SweepReport, ApplicationError> {
        let as_of = self.engine.clock().now().date_naive();
        self.sweeper.sweep(as_of, None, self.policy).await
    }

    /// First sweep runs immediately, then once per interval until `shutdown`
    /// flips to `true` or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                event_name = "system.scheduler.started",
                interval_secs = self.interval.as_secs(),
                policy = ?self.policy,
                "expiration sweep scheduler started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = self.run_once().await {
                            error!(
                                event_name = "system.scheduler.sweep_failed",
                                error = %error,
                                retryable = error.is_retryable(),
                                "scheduled expiration sweep failed"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(event_name = "system.scheduler.stopped", "expiration sweep scheduler stopped");
        })
    }
}
