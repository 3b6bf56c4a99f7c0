//! Daily push schedule: one cron occurrence per day in a fixed timezone.

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::assistant::engine::Engine;
use crate::assistant::gateway::Messenger;

/// Parse a wall-clock time "HH:MM" into (hour, minute).
pub fn parse_push_time(input: &str) -> Result<(u32, u32), String> {
    let (h, m) = input
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("Invalid time '{}'. Use HH:MM", input))?;

    let hour: u32 = h.parse().map_err(|_| format!("Invalid hour in '{}'", input))?;
    let minute: u32 = m.parse().map_err(|_| format!("Invalid minute in '{}'", input))?;

    if hour > 23 || minute > 59 || m.len() != 2 {
        return Err(format!("Time out of range: '{}'", input));
    }
    Ok((hour, minute))
}

/// Fires once per day at a local wall-clock time.
///
/// If the time falls in a DST gap, that day fires at the first valid minute
/// after the gap. If it falls in a repeated hour, the earlier instant wins.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    schedule: Schedule,
    timezone: Tz,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, timezone: Tz) -> Result<Self, String> {
        // cron crate uses 7-field format: sec min hour day month dow year
        let expr = format!("0 {} {} * * * *", minute, hour);
        let schedule = Schedule::from_str(&expr).map_err(|e| format!("Invalid cron: {}", e))?;
        Ok(Self { schedule, timezone })
    }

    /// Next occurrence strictly after `after`, in local time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Tz>> {
        // Walk wall-clock times (no gaps or repeats), then place each in the zone.
        let wall = Utc.from_utc_datetime(&after.with_timezone(&self.timezone).naive_local());
        self.schedule
            .after(&wall)
            .take(3)
            .filter_map(|occurrence| self.resolve(occurrence.naive_utc()))
            .find(|instant| instant.with_timezone(&Utc) > after)
    }

    fn resolve(&self, wall: NaiveDateTime) -> Option<DateTime<Tz>> {
        self.timezone.from_local_datetime(&wall).earliest().or_else(|| {
            (1..=180)
                .map(|minutes| wall + TimeDelta::minutes(minutes))
                .find_map(|shifted| self.timezone.from_local_datetime(&shifted).earliest())
        })
    }
}

/// Spawn the nightly push loop.
///
/// The next occurrence is always computed from the current time, so a run
/// missed while the process was down is skipped, not caught up.
pub fn spawn_daily_push<M>(engine: Arc<Engine>, messenger: Arc<M>, schedule: DailySchedule) -> JoinHandle<()>
where
    M: Messenger + 'static,
{
    tokio::spawn(run_push_loop(engine, messenger, schedule, Utc::now()))
}

/// Fire every occurrence after `from`, one at a time, forever.
///
/// Occurrences already in the past fire immediately.
pub async fn run_push_loop<M>(engine: Arc<Engine>, messenger: Arc<M>, schedule: DailySchedule, from: DateTime<Utc>)
where
    M: Messenger + 'static,
{
    let mut cursor = from;
    loop {
        let Some(next) = schedule.next_after(cursor) else {
            error!("Push schedule has no future occurrence, stopping");
            return;
        };
        info!("⏰ Next check-in push at {}", next.format("%Y-%m-%d %H:%M %Z"));

        let wait = (next.with_timezone(&Utc) - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        match engine.run_daily_push(messenger.as_ref(), next.date_naive()).await {
            Ok(report) => info!(
                "Check-in push for {}: {} sent, {} failed{}",
                next.date_naive(),
                report.sent,
                report.failed,
                if report.skipped { " (already done today)" } else { "" }
            ),
            Err(e) => warn!("Check-in push failed: {}", e),
        }

        cursor = next.with_timezone(&Utc);
    }
}
