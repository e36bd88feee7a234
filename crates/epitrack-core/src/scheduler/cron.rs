//! Five-field cron expressions evaluated in a fixed IANA time zone.

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use croner::Cron;

use crate::config::ScheduleConfig;
use crate::{Error, Result};

/// Upper bound on candidate slots rejected in a row because they fall in a
/// DST gap or were already passed during a DST overlap
const MAX_REJECTED_SLOTS: usize = 1500;

/// Source of fire times for the scheduler
pub trait Trigger: Send + Sync {
    /// First fire strictly after `after`, or `None` if there is none
    fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;

    fn describe(&self) -> String;
}

/// A parsed `minute hour day-of-month month day-of-week` schedule
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    cron: Cron,
}

impl std::fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expression", &self.expression)
            .field("timezone", &self.timezone.name())
            .finish()
    }
}

impl CronSchedule {
    /// Parse a five-field expression and an IANA zone name
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| Error::Config(format!("Unknown time zone '{}'", timezone)))?;

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::Config(format!(
                "Cron expression '{}' must have 5 fields (minute hour day-of-month month day-of-week), found {}",
                expression,
                fields.len()
            )));
        }
        let expression = fields.join(" ");

        let cron = Cron::new(&expression)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid cron expression '{}': {}", expression, e)))?;

        Ok(Self {
            expression,
            timezone,
            cron,
        })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::parse(&config.cron, &config.timezone)
    }
}

impl Trigger for CronSchedule {
    /// Slots are matched against local wall-clock time. A slot inside a DST
    /// gap does not exist and is skipped; a slot repeated by a DST overlap
    /// fires once, at its earlier instant.
    fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Wall-clock time carried in a UTC value so the cron search itself
        // never sees a DST transition
        let mut wall = Utc.from_utc_datetime(&after.with_timezone(&self.timezone).naive_local());

        for _ in 0..MAX_REJECTED_SLOTS {
            wall = self.cron.find_next_occurrence(&wall, false).ok()?;

            let instant = match self.timezone.from_local_datetime(&wall.naive_utc()) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earliest, _) => Some(earliest),
                LocalResult::None => None,
            };
            if let Some(dt) = instant.map(|dt| dt.with_timezone(&Utc)) {
                if dt > after {
                    return Some(dt);
                }
            }
        }

        None
    }

    fn describe(&self) -> String {
        format!("'{}' ({})", self.expression, self.timezone.name())
    }
}
