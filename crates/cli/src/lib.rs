pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "banko",
    about = "Banko operator CLI",
    long_about = "Inspect configuration, apply migrations and chat with the banking dialogs.",
    after_help = "Examples:\n  banko config\n  banko migrate\n  banko chat --conversation demo"
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
    #[command(about = "Talk to the dialogs over stdin; `/reset` clears state, `/quit` exits")]
    Chat {
        #[arg(long, default_value = "cli", help = "Conversation id to resume or start")]
        conversation: String,
        #[arg(long, help = "Skip the pauses the dialogs ask for between messages")]
        no_delays: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Chat { conversation, no_delays } => {
            commands::chat::run(commands::chat::ChatOptions {
                conversation_id: conversation,
                honor_delays: !no_delays,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
