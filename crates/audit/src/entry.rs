use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apotheca_core::UserId;

/// What a mutating operation did, for the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Approve,
    Decline,
    Delete,
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AuditAction::Create => write!(f, "create"),
            AuditAction::Update => write!(f, "update"),
            AuditAction::Approve => write!(f, "approve"),
            AuditAction::Decline => write!(f, "decline"),
            AuditAction::Delete => write!(f, "delete"),
        }
    }
}

/// One activity-log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_name: String,
    pub entity_id: Uuid,
    pub action: AuditAction,
    /// Acting user; `None` when the action was unattributed or the user no
    /// longer exists.
    pub user_id: Option<UserId>,
    /// Human-readable one-liner, e.g. "sale of 5 units approved".
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_name: impl Into<String>,
        entity_id: Uuid,
        action: AuditAction,
        user_id: Option<UserId>,
        summary: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_id,
            action,
            user_id,
            summary: summary.into(),
            occurred_at,
        }
    }
}
