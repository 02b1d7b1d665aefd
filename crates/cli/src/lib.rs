pub mod commands;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ladder",
    about = "Ladder approval routing operator CLI",
    long_about = "Operate the approval ladder: migrations, config inspection, readiness checks, level administration, and link diagnostics.",
    after_help = "Examples:\n  ladder doctor --json\n  ladder levels set --level 1 --name Supervisor --approver lead@example.com --max-amount 1000\n  ladder token inspect <token>"
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
    #[command(about = "Validate config, DB connectivity, and the configured approval ladder")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Inspect or change approval levels")]
    Levels(LevelsCommand),
    #[command(subcommand, about = "Diagnose approval link tokens")]
    Token(TokenCommand),
}

#[derive(Debug, Subcommand)]
enum LevelsCommand {
    #[command(about = "List every configured level, active or not")]
    List,
    #[command(about = "Add or replace one level; the whole ladder is validated before saving")]
    Set {
        #[arg(long)]
        level: u32,
        #[arg(long)]
        name: String,
        #[arg(long)]
        approver: String,
        #[arg(long, help = "Inclusive ceiling this level can finally approve; omit for unlimited")]
        max_amount: Option<Decimal>,
        #[arg(long, help = "Store the level as inactive")]
        inactive: bool,
    },
}

#[derive(Debug, Subcommand)]
enum TokenCommand {
    #[command(about = "Verify a token against the configured secret and show what it carries")]
    Inspect { token: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Levels(LevelsCommand::List) => commands::levels::list(),
        Command::Levels(LevelsCommand::Set { level, name, approver, max_amount, inactive }) => {
            commands::levels::set(commands::levels::LevelInput {
                level,
                name,
                approver,
                max_amount,
                active: !inactive,
            })
        }
        Command::Token(TokenCommand::Inspect { token }) => commands::token::inspect(&token),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
