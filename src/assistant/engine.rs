//! Check-in engine - logs reports, asks Gemini for advice, runs the nightly push.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assistant::database::{Database, DbError, EntryKind};
use crate::assistant::gateway::Messenger;
use crate::assistant::gemini::{GeminiClient, Generation};
use crate::assistant::prompt;

/// Sent instead of advice when every model is over quota.
pub const QUOTA_FALLBACK_REPLY: &str = "Sorry, I've hit the AI usage limit right now. \
Please send that again in a little while.\n(Your note is saved, so feel free to keep going.)";

/// Sent instead of a summary when every model is over quota.
pub const SUMMARY_QUOTA_FALLBACK_REPLY: &str =
    "Sorry, I've hit the AI usage limit right now. Please ask me again in a little while!";

/// Sent when a summary is requested before anything has been logged.
pub const INSUFFICIENT_DATA_REPLY: &str = "There isn't enough data to describe you yet. \
Tell me about your day for a few nights and ask again!";

/// Sent when generation failed for a reason other than quota.
pub const ERROR_REPLY: &str = "Sorry, something went wrong on my side. Please try again later.";

/// Sent when the platform does not tell us who wrote the message.
pub const NO_USER_REPLY: &str = "I couldn't get your user ID. Please try in a 1:1 chat.";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timezone: Tz,
    /// The nightly check-in question.
    pub daily_question: String,
    /// Messages that ask for a profile summary, compared after normalizing.
    pub summary_phrases: Vec<String>,
    /// Reports included when answering a new one.
    pub history_window: usize,
    /// Reports included in a profile summary.
    pub summary_window: usize,
}

/// What an inbound message is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Report,
    Summary,
}

/// Outcome of one nightly push run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub sent: usize,
    pub failed: usize,
    /// Today's push already ran.
    pub skipped: bool,
}

/// Strip whitespace and trailing question marks.
fn normalize_phrase(text: &str) -> &str {
    text.trim().trim_end_matches(['?', '？']).trim_end()
}

/// The check-in engine.
pub struct Engine {
    config: EngineConfig,
    database: Arc<Database>,
    gemini: GeminiClient,
}

impl Engine {
    pub fn new(config: EngineConfig, database: Arc<Database>, gemini: GeminiClient) -> Self {
        Self { config, database, gemini }
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.config.timezone)
    }

    /// Exact match against the configured summary phrases.
    pub fn classify(&self, text: &str) -> Intent {
        let text = normalize_phrase(text);
        if !text.is_empty()
            && self
                .config
                .summary_phrases
                .iter()
                .any(|p| normalize_phrase(p) == text)
        {
            Intent::Summary
        } else {
            Intent::Report
        }
    }

    /// Handle one inbound message and return the text to send back.
    ///
    /// Exactly one log entry is appended per call. Generation failures never
    /// surface here; only storage errors do.
    pub async fn handle_text(&self, user_id: &str, text: &str) -> Result<String, DbError> {
        let now = self.now();
        self.database.upsert_user(user_id, &now)?;

        match self.classify(text) {
            Intent::Summary => self.summarize(user_id, text, &now).await,
            Intent::Report => self.advise(user_id, text, &now).await,
        }
    }

    async fn advise(&self, user_id: &str, text: &str, now: &DateTime<Tz>) -> Result<String, DbError> {
        let history = self.database.recent(user_id, self.config.history_window)?;
        let id = self.database.append(user_id, EntryKind::Report, text, now)?;

        let prompt = prompt::daily_prompt(text, &history);
        match self.gemini.generate(&prompt).await {
            Ok(Generation::Text { text: reply, model }) => {
                self.database.record_reply(id, &reply, Some(&model))?;
                Ok(reply)
            }
            Ok(Generation::QuotaExceeded { retry_after }) => {
                warn!("🪫 All models over quota for entry #{} (retry hint: {:?})", id, retry_after);
                self.database.record_reply(id, QUOTA_FALLBACK_REPLY, None)?;
                Ok(QUOTA_FALLBACK_REPLY.to_string())
            }
            Err(e) => {
                error!("Generation failed for entry #{}: {}", id, e);
                Ok(ERROR_REPLY.to_string())
            }
        }
    }

    /// Summary Builder: a profile of the user from their own reports.
    async fn summarize(&self, user_id: &str, text: &str, now: &DateTime<Tz>) -> Result<String, DbError> {
        let history = self.database.recent(user_id, self.config.summary_window)?;
        let id = self.database.append(user_id, EntryKind::Summary, text, now)?;

        info!("🪞 Summary requested by {} over {} entries", user_id, history.len());

        if history.is_empty() {
            self.database.record_reply(id, INSUFFICIENT_DATA_REPLY, None)?;
            return Ok(INSUFFICIENT_DATA_REPLY.to_string());
        }

        match self.gemini.generate(&prompt::profile_prompt(&history)).await {
            Ok(Generation::Text { text: reply, model }) => {
                self.database.record_reply(id, &reply, Some(&model))?;
                Ok(reply)
            }
            Ok(Generation::QuotaExceeded { retry_after }) => {
                warn!("🪫 All models over quota for summary #{} (retry hint: {:?})", id, retry_after);
                self.database.record_reply(id, SUMMARY_QUOTA_FALLBACK_REPLY, None)?;
                Ok(SUMMARY_QUOTA_FALLBACK_REPLY.to_string())
            }
            Err(e) => {
                error!("Summary generation failed for #{}: {}", id, e);
                Ok(ERROR_REPLY.to_string())
            }
        }
    }

    /// Push the check-in question to every registered user, at most once per `date`.
    pub async fn run_daily_push<M: Messenger>(&self, messenger: &M, date: NaiveDate) -> Result<PushReport, DbError> {
        if !self.database.claim_push(date, &self.now())? {
            info!("Check-in push for {} already ran, skipping", date);
            return Ok(PushReport { skipped: true, ..PushReport::default() });
        }

        let users = self.database.list_users()?;
        info!("🌙 Sending check-in to {} user(s)", users.len());

        let mut report = PushReport::default();
        for user_id in users {
            match messenger.push(&user_id, &self.config.daily_question).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!("Push failed for user {}: {}", user_id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
