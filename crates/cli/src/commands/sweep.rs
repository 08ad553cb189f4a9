use chrono::{NaiveDate, Utc};
use quoteflow_core::lifecycle::{ExpirationSweeper, ExpiryPolicy};
use quoteflow_core::CompanyId;
use serde::Serialize;

use crate::commands::{engine, finish, load_config, open_pool, runtime, CommandResult};

#[derive(Clone, Debug, Default)]
pub struct SweepArgs {
    /// `YYYY-MM-DD`; today (UTC) when absent.
    pub as_of: Option<String>,
    pub company: Option<String>,
    /// Switches the run to the age policy regardless of configuration.
    pub older_than_days: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SweepSummary {
    as_of: NaiveDate,
    company: Option<String>,
    policy: ExpiryPolicy,
    #[serde(flatten)]
    report: quoteflow_core::SweepReport,
}

pub fn run(args: SweepArgs) -> CommandResult {
    let as_of = match args.as_of.as_deref() {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => date,
            Err(error) => {
                return CommandResult::failure(
                    "sweep",
                    "invalid_argument",
                    format!("--as-of must be YYYY-MM-DD: {error}"),
                    6,
                );
            }
        },
        None => Utc::now().date_naive(),
    };

    let config = match load_config("sweep") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let policy = match args.older_than_days {
        Some(days) => ExpiryPolicy::OlderThanDays(days),
        None => config.sweeper.expiry_policy(),
    };
    let runtime = match runtime("sweep") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("sweep", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let (engine, worker) = engine(&pool, &config);
        let sweeper = ExpirationSweeper::new(engine.clone());

        let scope = args.company.clone().map(CompanyId);
        let result = match sweeper.sweep(as_of, scope, policy).await {
            Ok(report) => {
                let message = format!(
                    "expired {} of {} candidate quote(s), {} failure(s)",
                    report.expired_count,
                    report.scanned,
                    report.errors.len()
                );
                let summary = SweepSummary { as_of, company: args.company, policy, report };
                CommandResult::success_with("sweep", message, summary)
            }
            Err(error) => CommandResult::from_interface("sweep", error.into_interface("sweep")),
        };
        drop(sweeper);
        finish(engine, worker, pool).await;
        result
    })
}
