use std::{sync::Arc, time::Duration};

use chrono::{DateTime, NaiveTime, Utc};
use enricher_model::StageName;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{QuotaCommand, QuotaControl};
use crate::error::{EnricherError, Result};

/// Fixed daily UTC trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// Parse `HH:MM` (or `HH:MM:SS`).
    pub fn parse(raw: &str) -> Result<Self> {
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .map(Self::new)
            .map_err(|err| {
                EnricherError::InvalidInput(format!(
                    "invalid daily time `{raw}`: {err}"
                ))
            })
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// First trigger strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }

    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Submit a non-forced enable for every listed stage once per day.
pub fn spawn_daily_resume(
    schedule: DailySchedule,
    stages: Vec<StageName>,
    control: Arc<dyn QuotaControl>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = schedule.until_next(Utc::now());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            for stage in &stages {
                let command = QuotaCommand::Enable {
                    stage: *stage,
                    force: false,
                };
                match control.submit(command).await {
                    Ok(()) => info!(stage = %stage, "scheduled resume submitted"),
                    Err(err) => {
                        warn!(stage = %stage, error = %err, "scheduled resume failed")
                    }
                }
            }
        }
    })
}
