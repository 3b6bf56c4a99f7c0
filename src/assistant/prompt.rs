//! Prompt builders for daily advice and profile summaries.
//!
//! Prompts are bounded: each quoted line is truncated and the history block
//! has a character budget, filled from the most recent entry backwards.

use crate::assistant::database::LogEntry;

/// Max chars quoted from a single message or reply.
const MAX_LINE_CHARS: usize = 300;

/// Character budget for the whole history block.
const MAX_HISTORY_CHARS: usize = 4000;

/// Max chars of the new user message included in the prompt.
const MAX_MESSAGE_CHARS: usize = 1000;

/// Truncate to at most `max_chars` characters, marking the cut.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// Keep the newest lines that fit in the budget, returned oldest first.
fn fit_budget(lines: Vec<String>) -> Vec<String> {
    let mut total = 0;
    let mut kept = Vec::new();
    for line in lines.into_iter().rev() {
        let len = line.chars().count();
        if total + len > MAX_HISTORY_CHARS && !kept.is_empty() {
            break;
        }
        total += len;
        kept.push(line);
    }
    kept.reverse();
    kept
}

/// History with both sides of each exchange.
fn conversation_block(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return "(no history)".to_string();
    }

    let lines = entries
        .iter()
        .map(|e| {
            let reply = e.bot_reply.as_deref().unwrap_or("(no reply)");
            format!(
                "- [{}] User: {}\n  Coach: {}\n",
                e.log_date,
                truncate_chars(&e.user_message, MAX_LINE_CHARS),
                truncate_chars(reply, MAX_LINE_CHARS)
            )
        })
        .collect();

    fit_budget(lines).concat()
}

/// Only what the user wrote.
fn user_block(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return "(no logs)".to_string();
    }

    let lines = entries
        .iter()
        .map(|e| format!("- [{}] {}\n", e.log_date, truncate_chars(&e.user_message, MAX_LINE_CHARS)))
        .collect();

    fit_budget(lines).concat()
}

/// Prompt for a reply to today's report.
pub fn daily_prompt(user_message: &str, history: &[LogEntry]) -> String {
    format!(
        "You are a kind, practical coach for job hunting and study.\n\
         The user is reporting on their day. Reply briefly and concretely so their next step moves forward.\n\
         Requirements:\n\
         - 1 to 3 sentences.\n\
         - If you can, end with one question that keeps the conversation going.\n\
         - No lecturing.\n\n\
         Recent history:\n\
         {}\n\n\
         Today's message from the user:\n\
         {}\n",
        conversation_block(history),
        truncate_chars(user_message, MAX_MESSAGE_CHARS)
    )
}

/// Prompt for a profile summary built from the user's own messages.
pub fn profile_prompt(history: &[LogEntry]) -> String {
    format!(
        "You are a coach watching over the user's growth.\n\
         From the logs below, summarize the user's recent state as a short portrait.\n\
         Requirements:\n\
         - 3 to 5 sentences.\n\
         - First sentence: personality and strengths (for example drive or persistence).\n\
         - Second and third sentences: how busy they have been and what they are struggling with.\n\
         - Finish with a kind word and a suggested next step.\n\n\
         Logs:\n\
         {}\n",
        user_block(history)
    )
}
