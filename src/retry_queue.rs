//! Durable holding area for items whose scoring failed.
//!
//! Entries are read with [`RetryQueue::dequeue_batch`] without being removed;
//! only [`RetryQueue::mark_attempt`] removes or retires them, so a crash
//! between the two loses nothing. Concurrent readers of one stage may see the
//! same entries, which makes reprocessing at-least-once: downstream writes
//! must be idempotent per item id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CuratorError, Result};
use crate::locks::KeyedLocks;
use crate::model::WorkItem;
use crate::store::ItemStore;

/// Stage name used for items waiting on primary scoring.
pub const SCORING_STAGE: &str = "scoring";

/// Whether an entry can still be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Waiting for another attempt.
    Pending,
    /// Ran out of attempts. Kept for audit, never handed out again.
    Exhausted,
}

/// An item parked after a failed processing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    // The item exactly as it was when it failed.
    pub item: WorkItem,
    /// Most recent failure message.
    pub error: String,
    /// Retry attempts made since enqueueing; the original failure is not counted.
    pub attempts: u32,
    /// Processing stage the item failed in, e.g. [`SCORING_STAGE`].
    pub stage: String,
    pub status: EntryStatus,
    pub enqueued_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(item: WorkItem, error: String, stage: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            error,
            attempts: 0,
            stage,
            status: EntryStatus::Pending,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        }
    }
}

/// What [`RetryQueue::mark_attempt`] did with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The attempt succeeded and the entry is gone.
    Removed,
    /// The attempt failed; the entry stays pending.
    Retrying { attempts: u32 },
    /// The attempt failed and the entry is retired.
    Exhausted { attempts: u32 },
}

/// Retry queue over an [`ItemStore`], one lock per stage.
pub struct RetryQueue {
    store: Arc<dyn ItemStore>,
    // Attempts before an entry is retired as exhausted.
    max_attempts: u32,
    // Serializes writers of the same stage.
    locks: KeyedLocks,
}

impl RetryQueue {
    pub fn new(store: Arc<dyn ItemStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            locks: KeyedLocks::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Parks `item` with its failure. Starts at zero attempts.
    pub async fn enqueue(&self, item: WorkItem, error: impl Into<String>, stage: &str) -> Result<Uuid> {
        let entry = QueueEntry::new(item, error.into(), stage.to_string());
        let _guard = self.locks.lock(stage).await;
        self.store.insert_entry(&entry).await?;
        info!(entry = %entry.id, item = %entry.item.id, stage, error = %entry.error, "enqueued for retry");
        Ok(entry.id)
    }

    /// Oldest pending entries for `stage`, left in place.
    pub async fn dequeue_batch(&self, stage: &str, limit: usize) -> Result<Vec<QueueEntry>> {
        Ok(self
            .store
            .entries_for_stage(stage)
            .await?
            .into_iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .take(limit)
            .collect())
    }

    /// Records the outcome of one reprocessing attempt.
    pub async fn mark_attempt(
        &self,
        entry_id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> Result<AttemptOutcome> {
        let stage = self
            .store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("queue entry {entry_id}")))?
            .stage;

        let _guard = self.locks.lock(&stage).await;
        // Re-read under the lock; a racing caller may have settled it.
        let mut entry = self
            .store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("queue entry {entry_id}")))?;
        if entry.status == EntryStatus::Exhausted {
            return Ok(AttemptOutcome::Exhausted {
                attempts: entry.attempts,
            });
        }

        entry.attempts += 1;
        entry.last_attempt_at = Some(Utc::now());

        if success {
            self.store.remove_entry(entry_id).await?;
            info!(entry = %entry_id, attempts = entry.attempts, "retry succeeded, entry removed");
            return Ok(AttemptOutcome::Removed);
        }

        if let Some(error) = error {
            entry.error = error;
        }
        let outcome = if entry.attempts >= self.max_attempts {
            entry.status = EntryStatus::Exhausted;
            warn!(
                entry = %entry_id,
                item = %entry.item.id,
                attempts = entry.attempts,
                error = %entry.error,
                "retry attempts exhausted"
            );
            AttemptOutcome::Exhausted {
                attempts: entry.attempts,
            }
        } else {
            AttemptOutcome::Retrying {
                attempts: entry.attempts,
            }
        };
        self.store.update_entry(&entry).await?;
        Ok(outcome)
    }

    /// Retired entries for `stage`, for audit and manual follow-up.
    pub async fn exhausted(&self, stage: &str) -> Result<Vec<QueueEntry>> {
        Ok(self
            .store
            .entries_for_stage(stage)
            .await?
            .into_iter()
            .filter(|e| e.status == EntryStatus::Exhausted)
            .collect())
    }

    /// Pending entries for `stage`.
    pub async fn pending_len(&self, stage: &str) -> Result<usize> {
        Ok(self
            .store
            .entries_for_stage(stage)
            .await?
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .count())
    }
}
