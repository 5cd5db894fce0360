//! Append-only JSON-lines files for notifications and outgoing messages.
//!
//! The CLI has no mail or SMS gateway; messages are written to an outbox for another process
//! to deliver.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use provisio_engine::{MessageSender, NotificationSink};
use provisio_types::Notification;
use serde_json::{Value, json};
use tracing::info;

fn append_line(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("could not create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(value)?).with_context(|| format!("could not append to {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct JsonlNotifications {
    path: PathBuf,
}

impl JsonlNotifications {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NotificationSink for JsonlNotifications {
    fn record(&self, notification: Notification) -> Result<()> {
        info!(
            kind = %notification.kind,
            integration = %notification.integration_name,
            actor_id = ?notification.actor_id,
            "notification"
        );
        let mut line = serde_json::to_value(&notification)?;
        if let Some(object) = line.as_object_mut() {
            object.insert("recorded_at".into(), json!(Utc::now().to_rfc3339()));
        }
        append_line(&self.path, &line)
    }
}

#[derive(Debug, Clone)]
pub struct OutboxMessages {
    path: PathBuf,
}

impl OutboxMessages {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MessageSender for OutboxMessages {
    fn send_email(&self, to: &str, subject: &str, message: &str) -> Result<()> {
        append_line(
            &self.path,
            &json!({
                "channel": "email",
                "to": to,
                "subject": subject,
                "message": message,
                "queued_at": Utc::now().to_rfc3339(),
            }),
        )
    }

    fn send_text(&self, to: &str, message: &str) -> Result<()> {
        append_line(
            &self.path,
            &json!({
                "channel": "text",
                "to": to,
                "message": message,
                "queued_at": Utc::now().to_rfc3339(),
            }),
        )
    }
}
