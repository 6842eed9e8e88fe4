use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::record::{AuditRecord, CandidateRecord};
use super::state::{LifecycleEvent, Stage, StateMachine, Transition, Verdict};
use crate::adapters::{Action, CapabilityCheck, ensure_allowed};
use crate::error::{CuratorError, Result};
use crate::locks::KeyedLocks;
use crate::model::{ScoreResult, WorkItem};
use crate::store::ItemStore;

/// Destination for approved content.
///
/// `content_id` is stable for a record, so implementations can treat a
/// repeated call with the same id as a no-op.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, content_id: &str, record: &CandidateRecord) -> Result<()>;
}

/// Publisher that only logs. Used by the CLI demo.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, content_id: &str, record: &CandidateRecord) -> Result<()> {
        info!(content_id, title = %record.item.title, url = %record.item.url, "content published");
        Ok(())
    }
}

/// Drives candidate records through the lifecycle.
///
/// Writers are serialized per canonical URL at ingest and per record id for
/// every later transition, so concurrent calls cannot double-insert or
/// double-publish.
pub struct Lifecycle {
    store: Arc<dyn ItemStore>,
    capability: Arc<dyn CapabilityCheck>,
    publisher: Arc<dyn Publisher>,
    accept_threshold: u8,
    url_locks: KeyedLocks,
    record_locks: KeyedLocks,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn ItemStore>,
        capability: Arc<dyn CapabilityCheck>,
        publisher: Arc<dyn Publisher>,
        accept_threshold: u8,
    ) -> Self {
        Self {
            store,
            capability,
            publisher,
            accept_threshold,
            url_locks: KeyedLocks::new(),
            record_locks: KeyedLocks::new(),
        }
    }

    pub fn accept_threshold(&self) -> u8 {
        self.accept_threshold
    }

    /// Creates a candidate for `item` unless its URL is already known.
    pub async fn ingest(&self, item: WorkItem, actor: &str) -> Result<CandidateRecord> {
        ensure_allowed(self.capability.as_ref(), actor, Action::Ingest)?;
        if item.url.trim().is_empty() {
            return Err(CuratorError::Validation(format!("item {} has no canonical url", item.id)));
        }

        let _guard = self.url_locks.lock(&item.url).await;
        if let Some(existing) = self.store.find_by_url(&item.url).await?.last() {
            info!(url = %item.url, existing = %existing.id, stage = %existing.stage, "duplicate candidate rejected");
            return Err(CuratorError::Duplicate {
                url: item.url,
                existing: existing.id,
            });
        }

        let mut record = CandidateRecord::new(item);
        record.record_creation(actor);
        self.store.insert_record(&record).await?;
        info!(record = %record.id, url = %record.item.url, actor, "candidate ingested");
        Ok(record)
    }

    /// Archives a candidate with its score; accepted iff the score reaches
    /// the accept threshold.
    pub async fn archive(
        &self,
        record_id: Uuid,
        score: ScoreResult,
        actor: &str,
    ) -> Result<CandidateRecord> {
        ensure_allowed(self.capability.as_ref(), actor, Action::Score)?;
        let _guard = self.record_locks.lock(&record_id.to_string()).await;
        let mut record = self.load(record_id).await?;
        if score.item_id != record.item.id {
            return Err(CuratorError::Validation(format!(
                "score for item {} does not belong to record {record_id}",
                score.item_id
            )));
        }

        let accepted = score.score >= self.accept_threshold;
        match StateMachine::next(record.stage, LifecycleEvent::Scored { accepted })? {
            Transition::Advance(to) => {
                record.score = Some(score);
                self.commit(&mut record, to, actor).await?;
            }
            Transition::Unchanged => {}
        }
        Ok(record)
    }

    pub async fn approve(&self, record_id: Uuid, actor: &str) -> Result<CandidateRecord> {
        ensure_allowed(self.capability.as_ref(), actor, Action::Approve)?;
        let _guard = self.record_locks.lock(&record_id.to_string()).await;
        let mut record = self.load(record_id).await?;
        if let Transition::Advance(to) = StateMachine::next(record.stage, LifecycleEvent::Approved)? {
            self.commit(&mut record, to, actor).await?;
        }
        Ok(record)
    }

    /// Publishes an approved record. On publisher failure the record stays
    /// approved and the call can be retried.
    pub async fn publish(&self, record_id: Uuid, actor: &str) -> Result<CandidateRecord> {
        ensure_allowed(self.capability.as_ref(), actor, Action::Publish)?;
        let _guard = self.record_locks.lock(&record_id.to_string()).await;
        let mut record = self.load(record_id).await?;
        let Transition::Advance(to) = StateMachine::next(record.stage, LifecycleEvent::Published)? else {
            return Ok(record);
        };

        let content_id = record.publish_key();
        if let Err(err) = self.publisher.publish(&content_id, &record).await {
            warn!(record = %record_id, error = %err, "publish failed, record stays approved");
            return Err(err);
        }
        record.content_id = Some(content_id);
        self.commit(&mut record, to, actor).await?;
        Ok(record)
    }

    /// Starts a fresh candidate from a rejected record's item.
    pub async fn resubmit(&self, record_id: Uuid, actor: &str) -> Result<CandidateRecord> {
        ensure_allowed(self.capability.as_ref(), actor, Action::Resubmit)?;
        let rejected = self.load(record_id).await?;
        if rejected.stage != Stage::Archived(Verdict::Rejected) {
            return Err(CuratorError::InvalidTransition {
                from: rejected.stage,
                action: "resubmit",
            });
        }

        let _guard = self.url_locks.lock(&rejected.item.url).await;
        let live = self
            .store
            .find_by_url(&rejected.item.url)
            .await?
            .into_iter()
            .find(|r| r.stage != Stage::Archived(Verdict::Rejected));
        if let Some(live) = live {
            return Err(CuratorError::Duplicate {
                url: rejected.item.url,
                existing: live.id,
            });
        }

        let mut record = CandidateRecord::new(rejected.item);
        record.record_creation(actor);
        self.store.insert_record(&record).await?;
        info!(record = %record.id, previous = %record_id, actor, "rejected candidate resubmitted");
        Ok(record)
    }

    pub async fn get(&self, record_id: Uuid) -> Result<Option<CandidateRecord>> {
        self.store.get_record(record_id).await
    }

    pub async fn list(&self, stage: Option<Stage>) -> Result<Vec<CandidateRecord>> {
        self.store.list_records(stage).await
    }

    pub async fn audit(&self, record_id: Uuid) -> Result<AuditRecord> {
        Ok(AuditRecord::from_record(&self.load(record_id).await?))
    }

    async fn load(&self, record_id: Uuid) -> Result<CandidateRecord> {
        self.store
            .get_record(record_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("record {record_id}")))
    }

    async fn commit(&self, record: &mut CandidateRecord, to: Stage, actor: &str) -> Result<()> {
        let from = record.stage;
        record.advance(to, actor);
        self.store.update_record(record).await?;
        info!(record = %record.id, %from, %to, actor, "lifecycle transition");
        Ok(())
    }
}
