pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stayql",
    about = "StayQL operator CLI",
    long_about = "Prepare the reservations dataset, inspect configuration, check SQL against the read-only rules, and ask questions from the terminal.",
    after_help = "Examples:\n  stayql doctor --json\n  stayql seed\n  stayql validate \"SELECT COUNT(*) FROM reviews\"\n  stayql ask \"What was the average guest count in Q1 2025?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending dataset migrations and return structured status output")]
    Migrate,
    #[command(about = "Replace the dataset contents with deterministic demo reservations and reviews")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, dataset readability, and LLM settings")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Check a SQL statement against the read-only validation rules")]
    Validate {
        #[arg(help = "SQL statement to check")]
        sql: String,
    },
    #[command(about = "Answer one question against the dataset and print the response as JSON")]
    Ask {
        #[arg(help = "Question in plain language")]
        question: String,
        #[arg(long, default_value = "cli", help = "Conversation session identifier")]
        session_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Validate { sql } => commands::validate::run(&sql),
        Command::Ask { question, session_id } => commands::ask::run(&question, &session_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
