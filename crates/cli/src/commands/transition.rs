use quoteflow_core::lifecycle::TransitionRequest;
use quoteflow_core::{ActorId, QuoteId, QuoteStatus, TransitionOutcome};
use serde::Serialize;

use crate::commands::{engine, finish, load_config, open_pool, runtime, CommandResult};

#[derive(Clone, Debug)]
pub struct TransitionArgs {
    pub quote_id: String,
    pub status: String,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransitionSummary {
    quote_id: QuoteId,
    quote_number: String,
    from: QuoteStatus,
    to: QuoteStatus,
    applied: bool,
}

pub fn run(args: TransitionArgs) -> CommandResult {
    let Some(target) = QuoteStatus::parse(&args.status) else {
        let known: Vec<&str> = QuoteStatus::ALL.iter().map(QuoteStatus::as_str).collect();
        return CommandResult::failure(
            "transition",
            "invalid_argument",
            format!("unknown status `{}` (expected one of: {})", args.status, known.join(", ")),
            6,
        );
    };

    let config = match load_config("transition") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("transition") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("transition", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let (engine, worker) = engine(&pool, &config);
        let id = QuoteId(args.quote_id.clone());

        let mut request = TransitionRequest::new(target);
        if let Some(actor) = args.actor {
            request = request.by(ActorId(actor));
        }
        if let Some(reason) = args.reason {
            request = request.because(reason);
        }

        let result = match engine.apply(&id, request).await {
            Ok(outcome) => {
                let applied = outcome.is_applied();
                let from = match &outcome {
                    TransitionOutcome::Applied { from, .. } => *from,
                    TransitionOutcome::Unchanged { quote } => quote.status,
                };
                let quote = outcome.quote();
                let message = if applied {
                    format!("quote {} moved from {from} to {target}", quote.display_number())
                } else {
                    format!("quote {} is already {target}", quote.display_number())
                };
                CommandResult::success_with(
                    "transition",
                    message,
                    TransitionSummary {
                        quote_id: quote.id.clone(),
                        quote_number: quote.display_number().to_string(),
                        from,
                        to: target,
                        applied,
                    },
                )
            }
            Err(error) => {
                CommandResult::from_interface("transition", error.into_interface(args.quote_id))
            }
        };
        finish(engine, worker, pool).await;
        result
    })
}
