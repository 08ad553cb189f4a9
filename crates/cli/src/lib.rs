pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::sweep::SweepArgs;
use commands::transition::TransitionArgs;

#[derive(Debug, Parser)]
#[command(
    name = "quoteflow",
    about = "Quoteflow operator CLI",
    long_about = "Operate the quote lifecycle engine: migrations, config inspection, expiration \
                  sweeps, manual status transitions, quote duplication, and status history.",
    after_help = "Examples:\n  quoteflow doctor --json\n  quoteflow sweep --as-of 2026-03-01\n  \
                  quoteflow transition <quote-id> accepted --actor ops --reason \"signed PO\"\n  \
                  quoteflow duplicate <quote-id> --actor ops"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Expire sent or pending quotes that are past due")]
    Sweep {
        #[arg(long, value_name = "YYYY-MM-DD", help = "Reference date (defaults to today, UTC)")]
        as_of: Option<String>,
        #[arg(long, value_name = "COMPANY_ID", help = "Limit the sweep to one company")]
        company: Option<String>,
        #[arg(long, value_name = "DAYS", help = "Expire by quote age instead of validity date")]
        older_than_days: Option<u32>,
    },
    #[command(about = "Move a quote to another status through the transition engine")]
    Transition {
        quote_id: String,
        #[arg(help = "Target status: draft, sent, pending, accepted, rejected, expired, cancelled")]
        status: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    #[command(about = "Copy a quote into a new draft dated today")]
    Duplicate {
        quote_id: String,
        #[arg(long)]
        actor: Option<String>,
    },
    #[command(about = "Print the status history of a quote, oldest first")]
    History { quote_id: String },
    #[command(about = "Validate config, template, DB connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Sweep { as_of, company, older_than_days } => {
            commands::sweep::run(SweepArgs { as_of, company, older_than_days })
        }
        Command::Transition { quote_id, status, actor, reason } => {
            commands::transition::run(TransitionArgs { quote_id, status, actor, reason })
        }
        Command::Duplicate { quote_id, actor } => commands::duplicate::run(&quote_id, actor),
        Command::History { quote_id } => commands::history::run(&quote_id),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
