//! Collaborators the embedding application supplies to the engine.
//!
//! The engine never touches storage, schedulers or message gateways directly. Hosts implement
//! these traits; [`memory`] provides in-process versions used by tests and dry runs.

use std::time::Duration;

use anyhow::Result;
use provisio_types::{Actor, CredentialState, IntegrationConfig, Notification};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;

/// Access record for integrations whose accounts are created by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAccess {
    pub revoked: bool,
}

/// Persistence for integration configuration and actor fields.
pub trait IntegrationStore {
    /// Persist every credential field in one write.
    fn save_credentials(&self, integration_id: u64, state: &CredentialState) -> Result<()>;

    fn save_actor_fields(&self, actor_id: u64, fields: &Map<String, Value>) -> Result<()>;

    fn load_integration(&self, integration_id: u64) -> Result<IntegrationConfig>;

    fn load_actor(&self, actor_id: u64) -> Result<Actor>;

    /// Manual access record for the pair, if one was ever created.
    fn manual_access(&self, actor_id: u64, integration_id: u64) -> Result<Option<ManualAccess>>;
}

/// Payload of a delayed rerun of a failed workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    pub actor_id: u64,
    pub integration_id: u64,
    /// Parameters the failed run was started with.
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("a job named '{name}' is already scheduled")]
    Duplicate { name: String },
    #[error("could not schedule job: {0}")]
    Backend(String),
}

/// Durable one-shot scheduler. Job names are unique.
pub trait RetryScheduler {
    fn schedule_once(&self, name: &str, delay: Duration, job: RetryJob) -> Result<(), ScheduleError>;
}

/// Receives notification records.
pub trait NotificationSink {
    fn record(&self, notification: Notification) -> Result<()>;
}

/// Email and text-message delivery.
pub trait MessageSender {
    fn send_email(&self, to: &str, subject: &str, message: &str) -> Result<()>;

    fn send_text(&self, to: &str, message: &str) -> Result<()>;
}

/// Bundle of host collaborators handed to a runner.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub store: &'a dyn IntegrationStore,
    pub scheduler: &'a dyn RetryScheduler,
    pub notifications: &'a dyn NotificationSink,
    pub messages: &'a dyn MessageSender,
}
