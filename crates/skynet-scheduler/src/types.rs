use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A calendar unit used by `EveryN`/`InN` schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Seconds => Duration::seconds(amount as i64),
            TimeUnit::Minutes => Duration::minutes(amount as i64),
            TimeUnit::Hours => Duration::hours(amount as i64),
            TimeUnit::Days => Duration::days(amount as i64),
        }
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim_end_matches('s') {
            "second" => Ok(TimeUnit::Seconds),
            "minute" | "min" => Ok(TimeUnit::Minutes),
            "hour" => Ok(TimeUnit::Hours),
            "day" => Ok(TimeUnit::Days),
            other => Err(format!("unknown time unit: {other}")),
        }
    }
}

/// Defines when and how often a job should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given UTC instant (ISO-8601 datetime form).
    Once { at: DateTime<Utc> },

    /// Run once, `amount` `unit`s from creation time ("in 10 minutes").
    InN { amount: u64, unit: TimeUnit },

    /// Run repeatedly every `amount` `unit`s ("every 2 hours").
    EveryN { amount: u64, unit: TimeUnit },

    /// Run repeatedly with a fixed interval in seconds. Kept for jobs
    /// persisted before `EveryN` existed; `EveryN` is preferred going forward.
    Interval { every_secs: u64 },

    /// Run every day at the given hour and minute (UTC).
    Daily { hour: u8, minute: u8 },

    /// Run on a specific weekday (0 = Monday … 6 = Sunday) at the given time (UTC).
    Weekly { day: u8, hour: u8, minute: u8 },

    /// Run according to a standard 5-field cron expression (UTC).
    Cron { expression: String },
}

/// Lifecycle state of a job execution slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next_run time.
    Pending,
    /// Currently being executed.
    Running,
    /// Finished successfully (used for Once jobs after their single run).
    Completed,
    /// Last execution returned an error.
    Failed,
    /// The scheduled window was skipped (e.g. engine was offline).
    Missed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Missed => "missed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "missed" => Ok(JobStatus::Missed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Serialised schedule definition.
    pub schedule: Schedule,
    /// Arbitrary JSON payload forwarded to the job handler.
    pub action: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Whether the job is eligible to fire. A job created with a
    /// prompt-injection-flagged action is persisted with `enabled = false`
    /// and never polled until an operator re-enables it.
    pub enabled: bool,
    /// ISO-8601 timestamp of the most recent execution start, if any.
    pub last_run: Option<String>,
    /// ISO-8601 timestamp of the next planned execution, if any.
    pub next_run: Option<String>,
    /// Total number of completed runs.
    pub run_count: u32,
    /// If set, the job is removed / marked Completed after this many runs.
    pub max_runs: Option<u32>,
    /// ISO-8601 timestamp of job creation.
    pub created_at: String,
    /// ISO-8601 timestamp of the last metadata update.
    pub updated_at: String,
}

/// A single fire or block event recorded for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub job_id: String,
    /// ISO-8601 timestamp of the event.
    pub ran_at: String,
    /// `true` if this record is a rejection (the prompt-injection scanner
    /// fired and the job never ran), `false` for a normal execution.
    pub blocked: bool,
    /// Human-readable output or, for a blocked record, the rejection reason.
    pub output: String,
}
