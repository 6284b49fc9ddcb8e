use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use banko_agent::{recognizer_from_config, BankoRuntime, InboundActivity, InboundKind};
use banko_core::config::{AppConfig, LoadOptions, LogFormat};
use banko_core::dialogs::{Orchestrator, OrchestratorSettings};
use banko_core::{banking_registry, Activity, RandomLedger};
use banko_db::{connect_with_config, migrations, SqlConversationStore};
use uuid::Uuid;

use crate::commands::CommandResult;

const BOT_ID: &str = "banko";
const USER_ID: &str = "cli-user";

#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub conversation_id: String,
    /// Sleep for `delay` activities instead of only printing them.
    pub honor_delays: bool,
}

type Failure = (&'static str, String, u8);

pub fn run(options: ChatOptions) -> CommandResult {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_session(stdin.lock(), stdout.lock(), options)
}

/// Reads one utterance per line until EOF or `/quit` and writes the bot's replies.
pub fn run_session<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    options: ChatOptions,
) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let (banko, pool) = assemble(&config).await?;
        let turns = converse(&banko, input, &mut output, &options).await;
        pool.close().await;
        turns
    });

    match result {
        Ok(turns) => CommandResult::success(
            "chat",
            format!("conversation `{}` ended after {turns} turn(s)", options.conversation_id),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

async fn assemble(config: &AppConfig) -> Result<(BankoRuntime, banko_db::DbPool), Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;

    let registry = banking_registry(Arc::new(RandomLedger))
        .map_err(|error| ("dialog_definition", error.to_string(), 6u8))?;
    let recognizer = recognizer_from_config(&config.nlu)
        .map_err(|error| ("nlu_setup", error.to_string(), 2u8))?;
    let store = Arc::new(SqlConversationStore::new(pool.clone()));
    let orchestrator = Orchestrator::new(Arc::new(registry), store, recognizer)
        .with_settings(OrchestratorSettings::from_config(config));

    Ok((BankoRuntime::new(Arc::new(orchestrator)), pool))
}

async fn converse<R: BufRead, W: Write>(
    banko: &BankoRuntime,
    input: R,
    output: &mut W,
    options: &ChatOptions,
) -> Result<usize, Failure> {
    let conversation = options.conversation_id.as_str();
    let joined = InboundActivity {
        kind: InboundKind::ConversationUpdate,
        members_added: vec![BOT_ID.to_owned(), USER_ID.to_owned()],
        recipient_id: Some(BOT_ID.to_owned()),
        text: None,
        ..InboundActivity::message(conversation, "")
    };
    reply(banko, joined, output, options.honor_delays).await?;

    let mut turns = 0;
    for line in input.lines() {
        let line = line.map_err(io_failure)?;
        let text = line.trim();
        match text {
            "/quit" | "/exit" => break,
            "/reset" => {
                let correlation_id = Uuid::new_v4().to_string();
                let notice = match banko.reset(conversation, &correlation_id).await {
                    Ok(()) => "(conversation reset)".to_owned(),
                    Err(error) => format!("bot> {}", error.user_message()),
                };
                writeln!(output, "{notice}").map_err(io_failure)?;
            }
            _ => {
                turns += 1;
                let inbound = InboundActivity::message(conversation, text);
                reply(banko, inbound, output, options.honor_delays).await?;
            }
        }
    }
    Ok(turns)
}

async fn reply<W: Write>(
    banko: &BankoRuntime,
    inbound: InboundActivity,
    output: &mut W,
    honor_delays: bool,
) -> Result<(), Failure> {
    let activities = match banko.handle_activity(inbound).await {
        Ok(activities) => activities,
        Err(error) => {
            return writeln!(output, "bot> {}", error.user_message()).map_err(io_failure);
        }
    };

    for activity in activities {
        match activity {
            Activity::Message { text } => writeln!(output, "bot> {text}").map_err(io_failure)?,
            Activity::Typing => writeln!(output, "(typing...)").map_err(io_failure)?,
            Activity::Delay { millis } => {
                output.flush().map_err(io_failure)?;
                if honor_delays {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
            }
        }
    }
    output.flush().map_err(io_failure)
}

fn io_failure(error: io::Error) -> Failure {
    ("io", error.to_string(), 7)
}

/// Logs go to stderr so the transcript on stdout stays clean.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(io::stderr);
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
