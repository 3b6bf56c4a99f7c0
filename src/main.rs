mod assistant;
mod config;
mod webhook;

use std::sync::Arc;

use teloxide::Bot;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use assistant::{DailySchedule, Database, Engine, GeminiClient, LineClient, TelegramClient, spawn_daily_push};
use config::{Config, Platform};
use webhook::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "nightcoach.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("nightcoach.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
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

    info!("🚀 Starting nightcoach...");
    info!("Loaded config from {config_path}");
    info!(
        "Platform: {:?}, check-in at {:02}:{:02} {}",
        config.platform, config.push_hour, config.push_minute, config.timezone
    );

    let database = match Database::open(&config.data_dir.join("nightcoach.db")) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let schedule = match DailySchedule::new(config.push_hour, config.push_minute, config.timezone) {
        Ok(schedule) => schedule,
        Err(e) => {
            error!("Invalid push schedule: {e}");
            std::process::exit(1);
        }
    };

    let gemini = GeminiClient::with_base_url(
        config.gemini_api_key.clone(),
        config.gemini_base_url.clone(),
        config.models.clone(),
    );
    let engine = Arc::new(Engine::new(config.engine_config(), database, gemini));

    match config.platform {
        Platform::Line => {
            let line = Arc::new(LineClient::new(config.line_channel_access_token.clone()));
            spawn_daily_push(engine.clone(), line.clone(), schedule);

            let state = AppState {
                engine,
                line,
                channel_secret: Arc::from(config.line_channel_secret.as_str()),
            };
            if let Err(e) = webhook::serve(config.listen_addr, state).await {
                error!("Webhook server failed: {e}");
                std::process::exit(1);
            }
        }
        Platform::Telegram => {
            let bot = Bot::new(&config.telegram_bot_token);
            let telegram = Arc::new(TelegramClient::new(bot.clone()));
            spawn_daily_push(engine.clone(), telegram.clone(), schedule);

            assistant::telegram::run(bot, engine, telegram).await;
        }
    }
}
