use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apotheca_core::UserId;
use apotheca_pharmacy::BatchId;

/// Notification identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Alert type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OutOfStock,
    LowStock,
    NearExpiry,
    Expired,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// Structured reference to the entity an alert is about.
///
/// This is the dedup key (together with the kind): one unread notification
/// per `(kind, entity_name, entity_id)`. Matching is on this key, never on
/// message text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_name: String,
    pub entity_id: Uuid,
}

impl EntityRef {
    pub fn batch(batch_id: BatchId) -> Self {
        Self {
            entity_name: "batch".to_string(),
            entity_id: *batch_id.0.as_uuid(),
        }
    }
}

/// A derived alert.
///
/// Created by the evaluator when a condition first becomes true; marked read
/// when the condition clears or by explicit user action; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub message: String,
    pub entity: EntityRef,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// For expiry alerts: the batch's expiry date.
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional target user; `None` means broadcast.
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        severity: Severity,
        message: impl Into<String>,
        entity: EntityRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            kind,
            severity,
            message: message.into(),
            entity,
            read: false,
            read_at: None,
            expires_at: None,
            user_id: None,
            created_at,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn mark_read(&mut self, at: DateTime<Utc>) {
        if !self.read {
            self.read = true;
            self.read_at = Some(at);
        }
    }
}
