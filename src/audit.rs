//! Admin audit trail
//!
//! Every state-changing admin action appends one entry to `admin_audit_log`.
//! Writing is best effort: a failed insert is logged and dropped, never
//! reported back to the action that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{Query, Store};

pub const AUDIT_TABLE: &str = "admin_audit_log";

/// Audited admin actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    BalanceChange,
    BlockUser,
    UnblockUser,
    ChangeLevel,
    SendMessage,
    Broadcast,
    CreateOffer,
    UpdateOffer,
    DeleteOffer,
    CreateAchievement,
    UpdateAchievement,
    DeleteAchievement,
    AddKnowledge,
    DeleteKnowledge,
    SettingsUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::BalanceChange => "BALANCE_CHANGE",
            Self::BlockUser => "BLOCK_USER",
            Self::UnblockUser => "UNBLOCK_USER",
            Self::ChangeLevel => "CHANGE_LEVEL",
            Self::SendMessage => "SEND_MESSAGE",
            Self::Broadcast => "BROADCAST",
            Self::CreateOffer => "CREATE_OFFER",
            Self::UpdateOffer => "UPDATE_OFFER",
            Self::DeleteOffer => "DELETE_OFFER",
            Self::CreateAchievement => "CREATE_ACHIEVEMENT",
            Self::UpdateAchievement => "UPDATE_ACHIEVEMENT",
            Self::DeleteAchievement => "DELETE_ACHIEVEMENT",
            Self::AddKnowledge => "ADD_KNOWLEDGE",
            Self::DeleteKnowledge => "DELETE_KNOWLEDGE",
            Self::SettingsUpdate => "SETTINGS_UPDATE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub admin_username: String,
    pub action: String,
    pub details: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Appends and reads audit entries
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an entry; failures are logged and swallowed
    pub async fn log(&self, actor: &str, action: AuditAction, details: &str, target_id: Option<&str>) {
        let row = json!({
            "admin_username": actor,
            "action": action.as_str(),
            "details": details,
            "target_id": target_id,
            "created_at": Utc::now().to_rfc3339(),
        });

        match self.store.insert(AUDIT_TABLE, row).await {
            Ok(()) => debug!("Audit {} by {}", action, actor),
            Err(e) => warn!("Audit log write failed ({} by {}): {}", action, actor, e),
        }
    }

    /// Most recent entries first; empty when the store is unavailable
    pub async fn recent(&self, limit: usize) -> Vec<Value> {
        let query = Query::new().order_by("created_at", false).limit(limit);
        match self.store.select(AUDIT_TABLE, &query).await {
            Ok(rows) => rows.rows,
            Err(e) => {
                warn!("Audit log read failed: {}", e);
                Vec::new()
            }
        }
    }
}
