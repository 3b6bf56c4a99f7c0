//! Assistant module - nightly check-ins relayed to Gemini, logged in SQLite.

pub mod database;
pub mod engine;
pub mod gateway;
pub mod gemini;
pub mod line;
pub mod prompt;
pub mod schedule;
pub mod telegram;


pub use database::Database;
pub use engine::Engine;
pub use gemini::GeminiClient;
pub use line::LineClient;
pub use schedule::{DailySchedule, spawn_daily_push};
pub use telegram::TelegramClient;
