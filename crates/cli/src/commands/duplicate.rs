use chrono::NaiveDate;
use quoteflow_core::{ActorId, QuoteId};
use serde::Serialize;

use crate::commands::{engine, finish, load_config, open_pool, runtime, CommandResult};

#[derive(Debug, Serialize)]
struct DuplicateSummary {
    source_id: QuoteId,
    quote_id: QuoteId,
    quote_number: String,
    valid_until: NaiveDate,
}

/// Copies a quote into a fresh draft dated today.
pub fn run(quote_id: &str, actor: Option<String>) -> CommandResult {
    let config = match load_config("duplicate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("duplicate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("duplicate", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let (engine, worker) = engine(&pool, &config);
        let source = QuoteId(quote_id.to_string());

        let result = match engine.duplicate(&source, actor.map(ActorId)).await {
            Ok(copy) => CommandResult::success_with(
                "duplicate",
                format!("created draft {} from quote {source}", copy.display_number()),
                DuplicateSummary {
                    source_id: source.clone(),
                    quote_id: copy.id.clone(),
                    quote_number: copy.display_number().to_string(),
                    valid_until: copy.valid_until,
                },
            ),
            Err(error) => {
                CommandResult::from_interface("duplicate", error.into_interface(quote_id))
            }
        };
        finish(engine, worker, pool).await;
        result
    })
}
