//! In-memory collaborators.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use indexmap::IndexMap;
use provisio_types::{Actor, CredentialState, IntegrationConfig, Notification, NotificationKind};
use serde_json::{Map, Value};

use super::{IntegrationStore, ManualAccess, MessageSender, NotificationSink, RetryJob, RetryScheduler, ScheduleError};

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory collaborator lock was poisoned")
}

/// Store backed by hash maps. Counts writes so callers can assert on persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    integrations: Mutex<HashMap<u64, IntegrationConfig>>,
    actors: Mutex<HashMap<u64, Actor>>,
    manual: Mutex<HashMap<(u64, u64), ManualAccess>>,
    credential_writes: Mutex<Vec<(u64, CredentialState)>>,
    actor_writes: Mutex<Vec<(u64, Map<String, Value>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_integration(&self, integration: IntegrationConfig) {
        if let Ok(mut integrations) = self.integrations.lock() {
            integrations.insert(integration.id, integration);
        }
    }

    pub fn insert_actor(&self, actor: Actor) {
        if let Ok(mut actors) = self.actors.lock() {
            actors.insert(actor.id, actor);
        }
    }

    pub fn grant_manual_access(&self, actor_id: u64, integration_id: u64, access: ManualAccess) {
        if let Ok(mut manual) = self.manual.lock() {
            manual.insert((actor_id, integration_id), access);
        }
    }

    pub fn credential_writes(&self) -> Vec<(u64, CredentialState)> {
        self.credential_writes.lock().map(|writes| writes.clone()).unwrap_or_default()
    }

    pub fn actor_writes(&self) -> Vec<(u64, Map<String, Value>)> {
        self.actor_writes.lock().map(|writes| writes.clone()).unwrap_or_default()
    }

    /// Stored copy of an actor, including persisted field writes.
    pub fn actor(&self, actor_id: u64) -> Option<Actor> {
        self.actors.lock().ok()?.get(&actor_id).cloned()
    }

    pub fn integration(&self, integration_id: u64) -> Option<IntegrationConfig> {
        self.integrations.lock().ok()?.get(&integration_id).cloned()
    }
}

impl IntegrationStore for MemoryStore {
    fn save_credentials(&self, integration_id: u64, state: &CredentialState) -> Result<()> {
        let mut integrations = self.integrations.lock().map_err(|_| poisoned())?;
        if let Some(integration) = integrations.get_mut(&integration_id) {
            integration.apply_credentials(state.clone());
        }
        self.credential_writes
            .lock()
            .map_err(|_| poisoned())?
            .push((integration_id, state.clone()));
        Ok(())
    }

    fn save_actor_fields(&self, actor_id: u64, fields: &Map<String, Value>) -> Result<()> {
        let mut actors = self.actors.lock().map_err(|_| poisoned())?;
        if let Some(actor) = actors.get_mut(&actor_id) {
            actor.extra_fields = fields.clone();
        }
        self.actor_writes
            .lock()
            .map_err(|_| poisoned())?
            .push((actor_id, fields.clone()));
        Ok(())
    }

    fn load_integration(&self, integration_id: u64) -> Result<IntegrationConfig> {
        self.integrations
            .lock()
            .map_err(|_| poisoned())?
            .get(&integration_id)
            .cloned()
            .ok_or_else(|| anyhow!("integration {integration_id} not found"))
    }

    fn load_actor(&self, actor_id: u64) -> Result<Actor> {
        self.actors
            .lock()
            .map_err(|_| poisoned())?
            .get(&actor_id)
            .cloned()
            .ok_or_else(|| anyhow!("actor {actor_id} not found"))
    }

    fn manual_access(&self, actor_id: u64, integration_id: u64) -> Result<Option<ManualAccess>> {
        Ok(self
            .manual
            .lock()
            .map_err(|_| poisoned())?
            .get(&(actor_id, integration_id))
            .copied())
    }
}

/// Scheduler that keeps jobs in insertion order and rejects duplicate names.
#[derive(Debug, Default)]
pub struct MemoryRetryScheduler {
    jobs: Mutex<IndexMap<String, (Duration, RetryJob)>>,
}

impl MemoryRetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<(String, Duration, RetryJob)> {
        self.jobs
            .lock()
            .map(|jobs| {
                jobs.iter()
                    .map(|(name, (delay, job))| (name.clone(), *delay, job.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl RetryScheduler for MemoryRetryScheduler {
    fn schedule_once(&self, name: &str, delay: Duration, job: RetryJob) -> Result<(), ScheduleError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| ScheduleError::Backend("scheduler lock was poisoned".into()))?;
        if jobs.contains_key(name) {
            return Err(ScheduleError::Duplicate { name: name.to_string() });
        }
        jobs.insert(name.to_string(), (delay, job));
        Ok(())
    }
}

/// Sink that keeps every notification.
#[derive(Debug, Default)]
pub struct RecordingNotifications {
    records: Mutex<Vec<Notification>>,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Notification> {
        self.records.lock().map(|records| records.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.records().iter().map(|record| record.kind).collect()
    }
}

impl NotificationSink for RecordingNotifications {
    fn record(&self, notification: Notification) -> Result<()> {
        self.records.lock().map_err(|_| poisoned())?.push(notification);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Email { to: String, subject: String, message: String },
    Text { to: String, message: String },
}

/// Sender that records messages and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingMessages {
    sent: Mutex<Vec<SentMessage>>,
    fail_email: bool,
    fail_text: bool,
}

impl RecordingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_text() -> Self {
        Self {
            fail_text: true,
            ..Self::default()
        }
    }

    pub fn failing_email() -> Self {
        Self {
            fail_email: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl MessageSender for RecordingMessages {
    fn send_email(&self, to: &str, subject: &str, message: &str) -> Result<()> {
        if self.fail_email {
            bail!("email gateway rejected the message");
        }
        self.sent.lock().map_err(|_| poisoned())?.push(SentMessage::Email {
            to: to.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn send_text(&self, to: &str, message: &str) -> Result<()> {
        if self.fail_text {
            bail!("text gateway rejected the message");
        }
        self.sent.lock().map_err(|_| poisoned())?.push(SentMessage::Text {
            to: to.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_job_names_are_rejected() {
        let scheduler = MemoryRetryScheduler::new();
        let job = RetryJob {
            actor_id: 1,
            integration_id: 2,
            params: Map::new(),
        };
        scheduler
            .schedule_once("retry", Duration::from_secs(1), job.clone())
            .expect("first");
        assert_eq!(
            scheduler.schedule_once("retry", Duration::from_secs(1), job),
            Err(ScheduleError::Duplicate { name: "retry".into() })
        );
        assert_eq!(scheduler.jobs().len(), 1);
    }

    #[test]
    fn actor_writes_replace_stored_fields() {
        let store = MemoryStore::new();
        store.insert_actor(Actor {
            id: 4,
            ..Actor::default()
        });
        let mut fields = Map::new();
        fields.insert("remote_id".into(), Value::from("42"));
        store.save_actor_fields(4, &fields).expect("save");
        assert_eq!(store.actor(4).map(|actor| actor.extra_fields), Some(fields));
        assert_eq!(store.actor_writes().len(), 1);
    }
}
