//! Notification records emitted by the engine for the host to store or display.

use serde::{Deserialize, Serialize};

/// Kinds of notification the engine records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    FailedIntegration,
    BlockedIntegration,
    RanIntegration,
    SentEmailNotification,
    FailedEmailNotification,
    FailedTextNotification,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::FailedIntegration => "failed-integration",
            NotificationKind::BlockedIntegration => "blocked-integration",
            NotificationKind::RanIntegration => "ran-integration",
            NotificationKind::SentEmailNotification => "sent-email-notification",
            NotificationKind::FailedEmailNotification => "failed-email-notification",
            NotificationKind::FailedTextNotification => "failed-text-notification",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification event. Descriptions are already scrubbed of secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Name of the integration that produced the event.
    pub integration_name: String,
    /// Actor the event concerns, when the run was bound to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<u64>,
    #[serde(default)]
    pub description: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, integration_name: impl Into<String>) -> Self {
        Self {
            kind,
            integration_name: integration_name.into(),
            actor_id: None,
            description: String::new(),
        }
    }

    pub fn for_actor(mut self, actor_id: Option<u64>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_kebab_case() {
        let notification = Notification::new(NotificationKind::FailedTextNotification, "Slack").for_actor(Some(7));
        let encoded = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(encoded["kind"], "failed-text-notification");
        assert_eq!(encoded["actor_id"], 7);
        assert_eq!(NotificationKind::RanIntegration.to_string(), "ran-integration");
    }
}
