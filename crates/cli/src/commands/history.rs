use quoteflow_core::QuoteId;

use crate::commands::{engine, finish, load_config, open_pool, runtime, CommandResult};

pub fn run(quote_id: &str) -> CommandResult {
    let config = match load_config("history") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("history") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("history", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let (engine, worker) = engine(&pool, &config);
        let id = QuoteId(quote_id.to_string());

        let result = match engine.history(&id).await {
            Ok(entries) => CommandResult::success_with(
                "history",
                format!("{} status change(s) for quote {id}", entries.len()),
                entries,
            ),
            Err(error) => CommandResult::from_interface("history", error.into_interface(quote_id)),
        };
        finish(engine, worker, pool).await;
        result
    })
}
