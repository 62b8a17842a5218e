//! Named-job scheduler for the agent processes.
//!
//! Each job has a name, a [`Schedule`] and an async callback. The run loop
//! wakes on a short tick, runs every job whose next fire time has passed,
//! and reschedules it from the current time. Jobs run one after another on
//! their own task, so a job that fails or panics is logged and the loop
//! carries on.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoffice_core::clock::Clock;
use chrono::{DateTime, Datelike, DurationRound, Timelike, Utc, Weekday};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{ActionError, SchedulerError};

/// Boxed future returned by a job callback.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send>>;

type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Longest gap between two fires of a cron spec.
const CRON_SEARCH_MINUTES: i64 = 8 * 24 * 60;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Every `Duration`, measured from the previous run.
    Interval(Duration),
    /// At matching wall-clock minutes (UTC).
    Cron(CronSpec),
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Schedule::Interval(interval)
    }

    /// Parse `"minute hour [day_of_week]"`; see [`CronSpec::parse`].
    pub fn cron(expr: &str) -> Result<Self, SchedulerError> {
        CronSpec::parse(expr).map(Schedule::Cron)
    }

    /// First fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                Some(after + step)
            }
            Schedule::Cron(spec) => spec.next_after(after),
        }
    }
}

/// A restricted cron expression: minute, hour and optional weekday.
///
/// Each field is a number or `*`. Weekdays are `0`-`6` (Sunday first) or
/// three-letter names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minute: Option<u32>,
    hour: Option<u32>,
    weekday: Option<Weekday>,
}

impl CronSpec {
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: &str| SchedulerError::InvalidCron(expr.to_string(), reason.to_string());
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if !(2..=3).contains(&fields.len()) {
            return Err(invalid("expected 'minute hour [day_of_week]'"));
        }

        let minute = parse_field(fields[0], 59).ok_or_else(|| invalid("minute out of range"))?;
        let hour = parse_field(fields[1], 23).ok_or_else(|| invalid("hour out of range"))?;
        let weekday = match fields.get(2) {
            None | Some(&"*") => None,
            Some(day) => Some(parse_weekday(day).ok_or_else(|| invalid("unknown day of week"))?),
        };
        Ok(Self {
            minute,
            hour,
            weekday,
        })
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.map_or(true, |m| at.minute() == m)
            && self.hour.map_or(true, |h| at.hour() == h)
            && self.weekday.map_or(true, |d| at.weekday() == d)
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.duration_trunc(chrono::Duration::minutes(1)).ok()?;
        (1..=CRON_SEARCH_MINUTES)
            .map(|i| start + chrono::Duration::minutes(i))
            .find(|t| self.matches(*t))
    }
}

/// `*` -> `Some(None)`, an in-range number -> `Some(Some(n))`.
fn parse_field(field: &str, max: u32) -> Option<Option<u32>> {
    if field == "*" {
        return Some(None);
    }
    field.parse::<u32>().ok().filter(|n| *n <= max).map(Some)
}

fn parse_weekday(field: &str) -> Option<Weekday> {
    match field.to_lowercase().as_str() {
        "0" | "7" | "sun" => Some(Weekday::Sun),
        "1" | "mon" => Some(Weekday::Mon),
        "2" | "tue" => Some(Weekday::Tue),
        "3" | "wed" => Some(Weekday::Wed),
        "4" | "thu" => Some(Weekday::Thu),
        "5" | "fri" => Some(Weekday::Fri),
        "6" | "sat" => Some(Weekday::Sat),
        _ => None,
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval(d) => write!(f, "every {}s", d.as_secs()),
            Schedule::Cron(spec) => {
                let field = |v: Option<u32>| v.map_or("*".to_string(), |n| n.to_string());
                write!(f, "cron {} {}", field(spec.minute), field(spec.hour))?;
                if let Some(day) = spec.weekday {
                    write!(f, " {}", day)?;
                }
                Ok(())
            }
        }
    }
}

struct Job {
    name: String,
    schedule: Schedule,
    task: JobFn,
    next_run: Option<DateTime<Utc>>,
}

/// Runs named jobs on their schedules until shut down.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    jobs: Mutex<Vec<Job>>,
    tick: Duration,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Mutex::new(Vec::new()),
            tick: Duration::from_secs(1),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// How often the run loop checks for due jobs.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Register a job. Its first run is one schedule period from now.
    pub fn add<F, Fut>(&self, name: &str, schedule: Schedule, f: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.iter().any(|j| j.name == name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }
        let next_run = schedule.next_fire_after(self.clock.now());
        debug!(job = name, schedule = %schedule, next_run = ?next_run, "Job scheduled");
        jobs.push(Job {
            name: name.to_string(),
            schedule,
            task: Arc::new(move || Box::pin(f()) as JobFuture),
            next_run,
        });
        Ok(())
    }

    pub fn job_names(&self) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.iter().map(|j| j.name.clone()).collect()
    }

    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.iter().find(|j| j.name == name).and_then(|j| j.next_run)
    }

    /// Run every job due at the clock's current time, in registration
    /// order. Returns the names of the jobs that ran.
    pub async fn run_due(&self) -> Vec<String> {
        let now = self.clock.now();
        let due: Vec<(String, JobFn)> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.iter_mut()
                .filter(|j| j.next_run.is_some_and(|t| t <= now))
                .map(|j| {
                    j.next_run = j.schedule.next_fire_after(now);
                    (j.name.clone(), Arc::clone(&j.task))
                })
                .collect()
        };

        let mut ran = Vec::with_capacity(due.len());
        for (name, task) in due {
            debug!(job = %name, "Running job");
            match tokio::spawn(task()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(job = %name, error = %e, "Job failed"),
                Err(e) if e.is_panic() => error!(job = %name, "Job panicked"),
                Err(e) => warn!(job = %name, error = %e, "Job cancelled"),
            }
            ran.push(name);
        }
        ran
    }

    /// Loop until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        info!(jobs = ?self.job_names(), "Scheduler started");
        loop {
            self.run_due().await;
            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Scheduler stopped");
    }

    /// Signal the scheduler to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
