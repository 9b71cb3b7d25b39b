use std::sync::Arc;

use anyhow::Context;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use valuebot::analytics::Analytics;
use valuebot::assistant::tools::value_tools;
use valuebot::assistant::{ensure_assistant, AssistantSpec, Gateway, OpenAiClient, ValueValidator};
use valuebot::bot::orchestrator::{ASK_VALUE, GREETING};
use valuebot::bot::{
    Database, Orchestrator, OrchestratorSettings, TelegramClient, ThreadCache, Turn, ValueRecord,
};
use valuebot::config::Config;

const ASSISTANT_NAME: &str = "AutoCreated Assistant";

struct BotState {
    orchestrator: Orchestrator,
    database: Arc<Database>,
}

/// Slash commands the bot answers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    MyValue,
    Values,
}

/// Parse `/command` or `/command@botname`, ignoring arguments.
fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_lowercase().as_str() {
        "start" => Some(Command::Start),
        "myvalue" => Some(Command::MyValue),
        "values" => Some(Command::Values),
        _ => None,
    }
}

fn format_values(values: &[ValueRecord]) -> String {
    if values.is_empty() {
        return "You haven't saved any values yet. Use /myvalue to add one.".to_string();
    }
    let mut text = String::from("Your values:");
    for value in values {
        text.push_str(&format!("\n• {}: {}", value.value_name, value.description));
    }
    text
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "valuebot.json".to_string());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("valuebot.log"))
        .context("Failed to open log file")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting valuebot...");
    info!("Loaded config from {config_path}");
    info!("Text mode: {:?}, thread policy: {:?}", config.text_mode, config.thread_policy);

    let backend = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.models.clone(),
    ));

    let spec = AssistantSpec {
        name: ASSISTANT_NAME.to_string(),
        instructions: config.assistant_instructions.clone(),
        model: config.assistant_model.clone(),
        vector_store_id: config.vector_store_id.clone(),
    };
    let (assistant_id, created) =
        ensure_assistant(backend.as_ref(), config.assistant_id.as_deref(), &spec)
            .await
            .context("Failed to provision assistant")?;
    if created {
        info!("Created assistant {assistant_id}");
        if let Err(e) = config.persist_assistant_id(&assistant_id) {
            warn!("Could not save assistant id to {config_path}: {e}");
        }
    }

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let database = Arc::new(
        Database::open(&config.database_path).context("Failed to open database")?,
    );
    std::fs::create_dir_all(&config.temp_dir).context("Failed to create temp dir")?;

    let analytics = match config.amplitude_api_key {
        Some(ref key) => {
            info!("Analytics enabled");
            Analytics::spawn(key.clone(), config.analytics_queue_capacity)
        }
        None => Analytics::disabled(),
    };

    let bot = Bot::new(&config.telegram_bot_token);

    let gateway = Gateway::new(
        backend.clone(),
        assistant_id,
        value_tools(config.vector_store_id.is_some()),
        config.poll,
        config.voice.clone(),
    );
    let orchestrator = Orchestrator::new(
        gateway,
        ValueValidator::new(backend),
        Arc::new(TelegramClient::new(bot.clone())),
        database.clone(),
        ThreadCache::new(database.clone()),
        analytics,
        OrchestratorSettings {
            text_mode: config.text_mode,
            thread_policy: config.thread_policy,
            temp_dir: config.temp_dir.clone(),
        },
    );

    let state = Arc::new(BotState { orchestrator, database });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let user = match msg.from {
        Some(ref u) => u,
        None => return Ok(()),
    };
    let turn = Turn {
        chat_id: msg.chat.id.0,
        user_id: user.id.0 as i64,
    };

    if let Some(voice) = msg.voice() {
        state.orchestrator.handle_voice(turn, &voice.file.id.0).await;
        return Ok(());
    }
    if let Some(audio) = msg.audio() {
        state.orchestrator.handle_voice(turn, &audio.file.id.0).await;
        return Ok(());
    }
    if let Some(photos) = msg.photo() {
        // Sizes are ordered smallest first.
        if let Some(photo) = photos.last() {
            state.orchestrator.handle_photo(turn, &photo.file.id.0).await;
        }
        return Ok(());
    }

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    match parse_command(text) {
        Some(command) => handle_command(&bot, &msg, &state, turn, command).await,
        None => {
            state.orchestrator.handle_text(turn, text).await;
            Ok(())
        }
    }
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    turn: Turn,
    command: Command,
) -> ResponseResult<()> {
    info!("📨 /{:?} from {}", command, turn.user_id);
    let reply = match command {
        Command::Start => {
            state
                .orchestrator
                .analytics()
                .track(turn.user_id, "start", serde_json::json!({}));
            GREETING.to_string()
        }
        Command::MyValue => ASK_VALUE.to_string(),
        Command::Values => match state.database.values_for_user(turn.user_id) {
            Ok(values) => format_values(&values),
            Err(e) => {
                warn!("Failed to list values for {}: {e}", turn.user_id);
                "⚠️ Could not load your values right now.".to_string()
            }
        },
    };
    bot.send_message(msg.chat.id, reply).await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use valuebot::bot::NewValue;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/myvalue"), Some(Command::MyValue));
        assert_eq!(parse_command("/values@valuebot"), Some(Command::Values));
        assert_eq!(parse_command("  /Start now"), Some(Command::Start));
        assert_eq!(parse_command("/unknown"), None);
        assert_eq!(parse_command("start"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_format_values() {
        assert!(format_values(&[]).contains("/myvalue"));
        let values = vec![ValueRecord {
            id: 1,
            user_id: 42,
            value_name: "Honesty".to_string(),
            description: "Telling the truth".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }];
        assert_eq!(format_values(&values), "Your values:\n• Honesty: Telling the truth");
    }

    #[test]
    fn test_values_listing_shows_only_own_values() {
        let db = Database::in_memory().unwrap();
        for (user_id, name, description) in [
            (1, "Honesty", "Telling the truth"),
            (2, "Freedom", "Choosing my own path"),
            (1, "Family", "Time with people I love"),
        ] {
            db.insert_value(&NewValue {
                user_id,
                name: name.to_string(),
                description: description.to_string(),
            })
            .unwrap();
        }

        let listing = format_values(&db.values_for_user(1).unwrap());
        assert_eq!(
            listing,
            "Your values:\n• Honesty: Telling the truth\n• Family: Time with people I love"
        );
        assert!(format_values(&db.values_for_user(3).unwrap()).contains("/myvalue"));
    }
}
