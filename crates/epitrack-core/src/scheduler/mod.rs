mod cron;
mod service;

pub use cron::{CronSchedule, Trigger};
pub use service::{FireReason, JobRun, Scheduler, SchedulerEvent, SchedulerState, WallClock};
