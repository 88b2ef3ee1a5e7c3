//! Broadcast Engine
//!
//! Fans one operator message (optionally with a photo) out to every
//! non-blocked user, one recipient at a time with a fixed pause after each
//! send to stay under Telegram's rate limits.
//!
//! Partial failure is the normal case: each recipient is counted as sent or
//! failed and the loop always runs to the end. Only an empty message or an
//! unreadable recipient list stops a broadcast before the first send.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditRecorder};
use crate::store::{value_text, Filter, Query, Store, StoreError};
use crate::telegram::Messenger;

pub const HISTORY_TABLE: &str = "broadcast_history";

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast message is empty")]
    EmptyMessage,

    #[error("No users to broadcast to")]
    NoRecipients,

    #[error("Failed to load recipients: {0}")]
    Store(#[from] StoreError),
}

/// Operator-authored broadcast
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub message: String,
    pub photo_url: Option<String>,
}

/// Delivery tally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastOutcome {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct BroadcastEngine {
    store: Arc<dyn Store>,
    messenger: Arc<dyn Messenger>,
    audit: AuditRecorder,
    /// Pause after every send
    delay: Duration,
}

impl BroadcastEngine {
    pub fn new(
        store: Arc<dyn Store>,
        messenger: Arc<dyn Messenger>,
        audit: AuditRecorder,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            messenger,
            audit,
            delay,
        }
    }

    async fn recipients(&self) -> Result<Vec<String>, StoreError> {
        let query = Query::new()
            .columns(&["telegram_id"])
            .filter(Filter::eq("is_blocked", false));
        let rows = self.store.select("users", &query).await?;

        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.get("telegram_id").and_then(value_text))
            .collect())
    }

    /// Deliver a broadcast to every eligible user
    pub async fn send(&self, actor: &str, request: BroadcastRequest) -> Result<BroadcastOutcome, BroadcastError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(BroadcastError::EmptyMessage);
        }
        let photo_url = request
            .photo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let recipients = self.recipients().await?;
        if recipients.is_empty() {
            return Err(BroadcastError::NoRecipients);
        }

        info!(
            "Broadcast by {} to {} recipients (photo: {})",
            actor,
            recipients.len(),
            photo_url.is_some()
        );

        let mut sent = 0;
        let mut failed = 0;

        for recipient in &recipients {
            let result = match photo_url {
                Some(url) => self.messenger.send_photo(recipient, url, Some(message)).await,
                None => self.messenger.send_text(recipient, message).await,
            };

            match result {
                Ok(outcome) if outcome.ok => sent += 1,
                Ok(outcome) => {
                    debug!("Broadcast to {} rejected: {:?}", recipient, outcome.description);
                    failed += 1;
                }
                Err(e) => {
                    debug!("Broadcast to {} failed: {}", recipient, e);
                    failed += 1;
                }
            }

            tokio::time::sleep(self.delay).await;
        }

        let outcome = BroadcastOutcome {
            sent,
            failed,
            total: recipients.len(),
        };

        let record = json!({
            "message": message,
            "photo_url": photo_url,
            "total_sent": outcome.total,
            "total_delivered": outcome.sent,
            "total_failed": outcome.failed,
            "admin_username": actor,
            "created_at": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.store.insert(HISTORY_TABLE, record).await {
            warn!("Failed to save broadcast history: {}", e);
        }

        self.audit
            .log(
                actor,
                AuditAction::Broadcast,
                &format!(
                    "Broadcast: {} delivered, {} failed of {}",
                    outcome.sent, outcome.failed, outcome.total
                ),
                None,
            )
            .await;

        info!(
            "Broadcast finished: {}/{} delivered, {} failed",
            outcome.sent, outcome.total, outcome.failed
        );

        Ok(outcome)
    }

    /// Most recent broadcasts; empty when the store is unavailable
    pub async fn history(&self, limit: usize) -> Vec<Value> {
        let query = Query::new().order_by("created_at", false).limit(limit);
        match self.store.select(HISTORY_TABLE, &query).await {
            Ok(rows) => rows.rows,
            Err(e) => {
                warn!("Failed to load broadcast history: {}", e);
                Vec::new()
            }
        }
    }
}
