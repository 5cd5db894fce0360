//! Retry jobs kept in a JSON file until they are due.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use provisio_engine::{RetryJob, RetryScheduler, ScheduleError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::file_store::{read_json_file, write_json_file};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRetry {
    pub name: String,
    pub due_at: DateTime<Utc>,
    pub job: RetryJob,
}

#[derive(Debug, Clone)]
pub struct FileRetryQueue {
    path: PathBuf,
}

impl FileRetryQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn entries(&self) -> Result<Vec<QueuedRetry>> {
        match read_json_file(&self.path)? {
            Some(value) => serde_json::from_value(value).with_context(|| format!("invalid retry queue {}", self.path.display())),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, entries: &[QueuedRetry]) -> Result<()> {
        write_json_file(&self.path, &serde_json::to_value(entries)?)
    }

    /// Remove and return every job due at `now`, oldest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedRetry>> {
        let (mut due, pending): (Vec<_>, Vec<_>) = self.entries()?.into_iter().partition(|entry| entry.due_at <= now);
        if !due.is_empty() {
            self.save(&pending)?;
        }
        due.sort_by_key(|entry| entry.due_at);
        Ok(due)
    }
}

impl RetryScheduler for FileRetryQueue {
    fn schedule_once(&self, name: &str, delay: Duration, job: RetryJob) -> Result<(), ScheduleError> {
        let backend = |error: anyhow::Error| ScheduleError::Backend(format!("{error:#}"));
        let mut entries = self.entries().map_err(backend)?;
        if entries.iter().any(|entry| entry.name == name) {
            return Err(ScheduleError::Duplicate { name: name.to_string() });
        }
        let delay = TimeDelta::from_std(delay).map_err(|error| ScheduleError::Backend(error.to_string()))?;
        let due_at = Utc::now() + delay;
        entries.push(QueuedRetry {
            name: name.to_string(),
            due_at,
            job,
        });
        self.save(&entries).map_err(backend)?;
        info!(job = name, due_at = %due_at, "retry queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn job(actor_id: u64) -> RetryJob {
        RetryJob {
            actor_id,
            integration_id: 5,
            params: Map::new(),
        }
    }

    #[test]
    fn names_are_unique_until_the_job_is_taken() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = FileRetryQueue::new(dir.path().join("retries.json"));

        queue.schedule_once("retry 5/9", Duration::ZERO, job(9)).expect("first");
        assert!(matches!(
            queue.schedule_once("retry 5/9", Duration::ZERO, job(9)),
            Err(ScheduleError::Duplicate { .. })
        ));

        let due = queue.take_due(Utc::now()).expect("take");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job, job(9));
        assert!(queue.entries().expect("entries").is_empty());
        queue.schedule_once("retry 5/9", Duration::ZERO, job(9)).expect("requeued");
    }

    #[test]
    fn future_jobs_stay_queued() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = FileRetryQueue::new(dir.path().join("retries.json"));
        queue
            .schedule_once("later", Duration::from_secs(3600), job(1))
            .expect("later");
        queue.schedule_once("now", Duration::ZERO, job(2)).expect("now");

        let due = queue.take_due(Utc::now()).expect("take");
        assert_eq!(due.iter().map(|entry| entry.name.as_str()).collect::<Vec<_>>(), vec!["now"]);
        assert_eq!(queue.entries().expect("entries").len(), 1);

        let everything = queue.take_due(Utc::now() + TimeDelta::hours(2)).expect("take");
        assert_eq!(everything[0].name, "later");
    }
}
