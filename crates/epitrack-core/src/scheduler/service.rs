use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cron::Trigger;
use crate::ingest::{IngestOutcome, IngestionInvoker};

/// Why a fire happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireReason {
    /// The immediate run performed by `start()`
    Startup,
    Scheduled,
    Manual,
}

impl fmt::Display for FireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FireReason::Startup => write!(f, "startup"),
            FireReason::Scheduled => write!(f, "scheduled"),
            FireReason::Manual => write!(f, "manual"),
        }
    }
}

/// Lifecycle of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    /// Waiting for the next fire
    Armed,
    /// A job run is in progress
    Running,
    Stopped,
}

/// One completed execution of the ingestion job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub reason: FireReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: IngestOutcome,
}

/// Events emitted by the scheduler to notify the daemon of progress
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    RunStarted {
        reason: FireReason,
        started_at: DateTime<Utc>,
    },
    /// Sent after the run slot has been released
    RunFinished(JobRun),
    /// A fire arrived while a run was still active and was dropped
    FireSkipped { reason: FireReason },
    Stopped,
}

/// Owns the single run slot and launches job runs into it
#[derive(Clone)]
struct JobRunner {
    invoker: Arc<dyn IngestionInvoker>,
    slot: Arc<Semaphore>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl JobRunner {
    fn send_event(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.event_tx {
            if tx.send(event).is_err() {
                debug!("Scheduler event dropped: receiver closed");
            }
        }
    }

    /// Start a job run unless one is already active. Overlapping fires are
    /// skipped, never queued.
    fn fire(&self, reason: FireReason) -> bool {
        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(trigger = %reason, "Previous ingestion run still active, skipping fire");
                self.send_event(SchedulerEvent::FireSkipped { reason });
                return false;
            }
        };

        let runner = self.clone();
        tokio::spawn(async move {
            let started_at = Utc::now();
            info!(
                trigger = %reason,
                "[{}] Starting ingestion: {}",
                started_at.to_rfc3339(),
                runner.invoker.describe()
            );
            runner.send_event(SchedulerEvent::RunStarted { reason, started_at });

            let outcome = runner.invoker.invoke().await;
            let finished_at = Utc::now();
            drop(permit);

            let elapsed_ms = (finished_at - started_at).num_milliseconds();
            match &outcome {
                IngestOutcome::Success(output) => {
                    info!(elapsed_ms, "Ingestion finished");
                    if !output.is_empty() {
                        info!("{}", output);
                    }
                }
                IngestOutcome::ProcessError(message) => {
                    error!(elapsed_ms, "Ingestion failed: {}", message);
                }
                IngestOutcome::StreamError(message) => {
                    error!(elapsed_ms, "Ingestion stderr: {}", message);
                }
            }

            runner.send_event(SchedulerEvent::RunFinished(JobRun {
                reason,
                started_at,
                finished_at,
                outcome,
            }));
        });

        true
    }
}

/// Source of wall-clock time for slot computation
pub type WallClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Recurring ingestion scheduler.
///
/// Fires the invoker once on `start()` and then on every trigger time until
/// `stop()`. At most one job run is active at any time.
pub struct Scheduler {
    trigger: Arc<dyn Trigger>,
    clock: WallClock,
    runner: JobRunner,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Scheduler {
    pub fn new(trigger: Arc<dyn Trigger>, invoker: Arc<dyn IngestionInvoker>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            trigger,
            clock: Arc::new(Utc::now),
            runner: JobRunner {
                invoker,
                slot: Arc::new(Semaphore::new(1)),
                event_tx: None,
            },
            shutdown_tx,
            driver: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Set the event sender for run notifications
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.runner.event_tx = Some(tx);
        self
    }

    /// Replace the wall clock, e.g. with one that follows paused test time
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SchedulerState {
        if self.stopped.load(Ordering::SeqCst) {
            SchedulerState::Stopped
        } else if self.runner.slot.available_permits() == 0 {
            SchedulerState::Running
        } else if !self.started.load(Ordering::SeqCst) {
            SchedulerState::Idle
        } else {
            SchedulerState::Armed
        }
    }

    /// Human-readable schedule, e.g. the cron expression and its zone
    pub fn describe(&self) -> String {
        self.trigger.describe()
    }

    /// Next scheduled fire from now, if the scheduler is live
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        match self.state() {
            SchedulerState::Stopped => None,
            _ => self.trigger.next_fire((self.clock)()),
        }
    }

    /// Run the job immediately, then follow the trigger. Calling this more
    /// than once, or after `stop()`, has no effect.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Scheduler already stopped, ignoring start");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already started");
            return;
        }

        info!("Scheduler started: {}", self.trigger.describe());

        let handle = tokio::spawn(drive(
            self.runner.clone(),
            self.trigger.clone(),
            self.clock.clone(),
            self.shutdown_tx.subscribe(),
        ));
        *self.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Fire now, outside the schedule. Returns false if the fire was skipped
    /// because a run is active or the scheduler has stopped.
    pub fn trigger_now(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Scheduler stopped, ignoring manual trigger");
            return false;
        }
        self.runner.fire(FireReason::Manual)
    }

    /// Cancel the pending fire and prevent any further ones. A run already in
    /// progress keeps going; use `wait_idle` to wait for it.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let handle = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Scheduler timer task ended abnormally: {}", e);
            }
        }

        info!("Scheduler stopped");
        self.runner.send_event(SchedulerEvent::Stopped);
    }

    /// Wait until no job run is active
    pub async fn wait_idle(&self) {
        let _ = self.runner.slot.acquire().await;
    }
}

async fn drive(
    runner: JobRunner,
    trigger: Arc<dyn Trigger>,
    clock: WallClock,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow() {
        return;
    }
    runner.fire(FireReason::Startup);

    // The timer is monotonic but slots come from the wall clock; searching
    // from the last fired slot keeps an early wake-up from repeating it.
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        let now = clock();
        let from = last_fired.map_or(now, |fired| fired.max(now));
        let Some(next) = trigger.next_fire(from) else {
            warn!("Schedule {} has no future fire times", trigger.describe());
            let _ = shutdown.wait_for(|stop| *stop).await;
            break;
        };
        let delay = (next - now).to_std().unwrap_or_default();
        debug!(next_fire = %next.to_rfc3339(), "Waiting for next scheduled fire");

        tokio::select! {
            biased;

            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = tokio::time::sleep(delay) => {
                last_fired = Some(next);
                runner.fire(FireReason::Scheduled);
            }
        }
    }

    debug!("Scheduler timer released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::cron::CronSchedule;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Fires every `interval` regardless of wall-clock alignment
    struct FixedInterval(Duration);

    impl Trigger for FixedInterval {
        fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
            Some(after + chrono::Duration::from_std(self.0).unwrap())
        }

        fn describe(&self) -> String {
            format!("every {:?}", self.0)
        }
    }

    struct Never;

    impl Trigger for Never {
        fn next_fire(&self, _after: DateTime<Utc>) -> Option<DateTime<Utc>> {
            None
        }

        fn describe(&self) -> String {
            "never".to_string()
        }
    }

    /// Records concurrency and takes `duration` per run
    struct SlowInvoker {
        duration: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        runs: AtomicUsize,
        outcome: IngestOutcome,
    }

    impl SlowInvoker {
        fn new(duration: Duration) -> Arc<Self> {
            Self::with_outcome(duration, IngestOutcome::Success("ok".to_string()))
        }

        fn with_outcome(duration: Duration, outcome: IngestOutcome) -> Arc<Self> {
            Arc::new(Self {
                duration,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
                outcome,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IngestionInvoker for SlowInvoker {
        fn describe(&self) -> String {
            "slow test job".to_string()
        }

        async fn invoke(&self) -> IngestOutcome {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    /// Wall clock that advances with tokio's (paused) time
    fn tokio_clock() -> WallClock {
        let base = Utc::now();
        let origin = tokio::time::Instant::now();
        Arc::new(move || base + chrono::Duration::from_std(origin.elapsed()).unwrap())
    }

    fn scheduler(trigger: impl Trigger + 'static, invoker: Arc<SlowInvoker>) -> Scheduler {
        Scheduler::new(Arc::new(trigger), invoker).with_clock(tokio_clock())
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// One fixed slot, then nothing
    struct SingleSlot(DateTime<Utc>);

    impl Trigger for SingleSlot {
        fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
            (self.0 > after).then_some(self.0)
        }

        fn describe(&self) -> String {
            format!("once at {}", self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_immediately_once() {
        let invoker = SlowInvoker::new(Duration::from_millis(10));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sched = scheduler(FixedInterval(Duration::from_secs(3600)), invoker.clone())
            .with_event_sender(tx);

        assert_eq!(sched.state(), SchedulerState::Idle);
        sched.start();
        sched.start();

        match rx.recv().await.unwrap() {
            SchedulerEvent::RunStarted { reason, .. } => assert_eq!(reason, FireReason::Startup),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SchedulerEvent::RunFinished(run) => {
                assert_eq!(run.reason, FireReason::Startup);
                assert!(run.outcome.is_success());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(invoker.runs(), 1);
        assert_eq!(sched.state(), SchedulerState::Armed);

        sched.stop().await;
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fires_are_skipped() {
        // Fires every 100ms, each run takes 250ms
        let invoker = SlowInvoker::new(Duration::from_millis(250));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sched = scheduler(FixedInterval(Duration::from_millis(100)), invoker.clone())
            .with_event_sender(tx);

        sched.start();
        tokio::time::sleep(Duration::from_millis(1050)).await;
        sched.stop().await;
        sched.wait_idle().await;

        assert_eq!(invoker.max_active.load(Ordering::SeqCst), 1);

        let mut started = 0;
        let mut skipped = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                SchedulerEvent::RunStarted { .. } => started += 1,
                SchedulerEvent::FireSkipped { reason } => {
                    assert_eq!(reason, FireReason::Scheduled);
                    skipped += 1;
                }
                _ => {}
            }
        }
        assert_eq!(started, invoker.runs());
        assert!(started >= 3, "expected several runs, got {}", started);
        assert!(skipped >= 5, "expected skipped fires, got {}", skipped);
        // Nothing was queued up behind the slow runs
        assert!(started < 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_does_not_stop_schedule() {
        let invoker = SlowInvoker::with_outcome(
            Duration::from_millis(5),
            IngestOutcome::ProcessError("exit status: 1".to_string()),
        );
        let sched = scheduler(FixedInterval(Duration::from_millis(100)), invoker.clone());

        sched.start();
        tokio::time::sleep(Duration::from_millis(350)).await;
        sched.stop().await;

        assert!(invoker.runs() >= 3, "got {}", invoker.runs());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_fires_but_lets_run_finish() {
        let invoker = SlowInvoker::new(Duration::from_millis(500));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sched = scheduler(FixedInterval(Duration::from_millis(100)), invoker.clone())
            .with_event_sender(tx);

        sched.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sched.stop().await;
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(!sched.trigger_now());
        assert!(sched.next_fire().is_none());

        sched.wait_idle().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(invoker.runs(), 1);

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if let SchedulerEvent::RunFinished(run) = event {
                assert!(run.outcome.is_success());
                finished += 1;
            }
        }
        assert_eq!(finished, 1);

        // terminal
        sched.start();
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_shares_the_slot() {
        let invoker = SlowInvoker::new(Duration::from_millis(200));
        let sched = scheduler(FixedInterval(Duration::from_secs(3600)), invoker.clone());

        sched.start();
        tokio::task::yield_now().await;
        assert_eq!(sched.state(), SchedulerState::Running);
        assert!(!sched.trigger_now());

        sched.wait_idle().await;
        assert!(sched.trigger_now());
        sched.wait_idle().await;
        assert_eq!(invoker.runs(), 2);

        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_never_fires() {
        let invoker = SlowInvoker::new(Duration::from_millis(1));
        let sched = scheduler(FixedInterval(Duration::from_millis(10)), invoker.clone());

        sched.stop().await;
        sched.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(invoker.runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_trigger_waits_for_stop() {
        let invoker = SlowInvoker::new(Duration::from_millis(1));
        let sched = scheduler(Never, invoker.clone());

        sched.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(invoker.runs(), 1);

        tokio::time::timeout(Duration::from_secs(1), sched.stop())
            .await
            .expect("stop should return promptly");
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_schedulers() {
        let first = SlowInvoker::new(Duration::from_millis(1));
        let second = SlowInvoker::new(Duration::from_millis(1));
        let a = scheduler(FixedInterval(Duration::from_secs(3600)), first.clone());
        let b = scheduler(FixedInterval(Duration::from_secs(3600)), second.clone());

        a.start();
        b.start();
        a.wait_idle().await;
        b.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.stop().await;

        assert_eq!(b.state(), SchedulerState::Armed);
        b.stop().await;
        assert_eq!(first.runs(), 1);
        assert_eq!(second.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_fires_once_when_wall_clock_lags() {
        // The wall clock stands still while the timer runs on
        let now = utc("2025-06-10T12:00:00Z");
        let invoker = SlowInvoker::new(Duration::from_millis(1));
        let sched = Scheduler::new(
            Arc::new(SingleSlot(now + chrono::Duration::hours(1))),
            invoker.clone(),
        )
        .with_clock(Arc::new(move || now));

        sched.start();
        tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
        sched.stop().await;

        // startup plus the single slot
        assert_eq!(invoker.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_cron_slots_are_distinct_after_failures() {
        let now = utc("2025-06-10T12:00:00Z");
        let schedule = CronSchedule::parse("0 2 * * *", "America/Chicago").unwrap();
        let invoker = SlowInvoker::with_outcome(
            Duration::ZERO,
            IngestOutcome::ProcessError("exit status: 1".to_string()),
        );
        let sched = Scheduler::new(Arc::new(schedule), invoker.clone())
            .with_clock(Arc::new(move || now));

        sched.start();
        tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;
        sched.stop().await;

        // Startup, then 2025-06-11 07:00Z after 19h, then 2025-06-12 07:00Z
        // after a further 43h. Re-firing the first slot would give 4.
        assert_eq!(invoker.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_before_start_reports_running() {
        let invoker = SlowInvoker::new(Duration::from_millis(200));
        let sched = scheduler(FixedInterval(Duration::from_secs(3600)), invoker.clone());

        assert!(sched.trigger_now());
        tokio::task::yield_now().await;
        assert_eq!(sched.state(), SchedulerState::Running);
        assert!(!sched.trigger_now());

        sched.wait_idle().await;
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert_eq!(invoker.runs(), 1);
    }
}
