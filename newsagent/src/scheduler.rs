use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::future::Future;
use tokio::time::Duration;
use tracing::{error, info};

/// Parse a daily run time given as `HH:MM` (24h).
pub fn parse_schedule(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("invalid schedule time '{}', expected HH:MM", raw))
}

/// Next local occurrence of `time` strictly after `now`.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        // Skips days where the wall-clock time does not exist (DST gaps).
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
        date += ChronoDuration::days(1);
    }
}

/// Run `job` now, then every day at `time` until Ctrl-C.
/// A failing run is logged and the next occurrence is awaited.
pub async fn run_daily<F, Fut>(time: NaiveTime, mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, stopping scheduler");
                return Ok(());
            }
            res = job() => {
                if let Err(e) = res {
                    error!(error = %format!("{:#}", e), "scheduled run failed");
                }
            }
        }

        let now = Local::now();
        let next = next_run_after(&now, time);
        let wait = (next.clone() - now).to_std().unwrap_or(Duration::from_secs(0));
        info!(next_run = %next.format("%Y-%m-%d %H:%M"), "waiting for next run");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, stopping scheduler");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
