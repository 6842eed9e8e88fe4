//! Ingest → score → archive, with failed primary scoring parked in the retry
//! queue when the fallback policy says so.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{Action, CapabilityCheck, ensure_allowed};
use crate::config::{CuratorConfig, FallbackPolicy};
use crate::error::{CuratorError, Result};
use crate::lifecycle::{CandidateRecord, Lifecycle, Publisher, Stage, Verdict};
use crate::model::{ScoreResult, WorkItem, rank};
use crate::pipeline::{ExecutionContext, StepHandler};
use crate::retry_queue::{AttemptOutcome, RetryQueue, SCORING_STAGE};
use crate::scoring::Scorer;
use crate::store::ItemStore;

/// An item that never became a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skipped {
    pub item_id: String,
    pub url: String,
    /// Set when the URL is already held by another record.
    pub existing: Option<Uuid>,
    pub reason: String,
}

/// Result of [`Curator::process_batch`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Archived records in input order.
    pub archived: Vec<CandidateRecord>,
    pub skipped: Vec<Skipped>,
    /// Retry-queue entry ids for items left as candidates.
    pub enqueued: Vec<Uuid>,
}

impl BatchReport {
    /// Scores of the archived records, best first.
    pub fn ranking(&self) -> Vec<&ScoreResult> {
        rank(self.archived.iter().filter_map(|r| r.score.as_ref()))
    }

    /// Records archived as accepted.
    pub fn accepted(&self) -> usize {
        self.archived
            .iter()
            .filter(|r| r.stage == Stage::Archived(Verdict::Accepted))
            .count()
    }

    pub fn fallback_scored(&self) -> usize {
        self.archived
            .iter()
            .filter(|r| r.score.as_ref().is_some_and(|s| s.fallback))
            .count()
    }
}

/// Counts from one [`Curator::reprocess`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReprocessReport {
    pub archived: usize,
    pub retrying: usize,
    pub exhausted: usize,
    /// Entries whose candidate had already moved on or disappeared.
    pub settled: usize,
}

/// The scoring workflow over one store.
pub struct Curator {
    store: Arc<dyn ItemStore>,
    scorer: Arc<dyn Scorer>,
    lifecycle: Lifecycle,
    queue: RetryQueue,
    capability: Arc<dyn CapabilityCheck>,
    policy: FallbackPolicy,
}

impl Curator {
    pub fn new(
        store: Arc<dyn ItemStore>,
        scorer: Arc<dyn Scorer>,
        capability: Arc<dyn CapabilityCheck>,
        publisher: Arc<dyn Publisher>,
        config: &CuratorConfig,
    ) -> Self {
        let lifecycle = Lifecycle::new(
            Arc::clone(&store),
            Arc::clone(&capability),
            publisher,
            config.lifecycle.accept_threshold,
        );
        let queue = RetryQueue::new(Arc::clone(&store), config.retry_queue.max_attempts);
        Self {
            store,
            scorer,
            lifecycle,
            queue,
            capability,
            policy: config.scoring.fallback_policy,
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Ingests `items`, scores the new candidates in one batch and archives
    /// them. Duplicate or invalid items are reported, not fatal.
    pub async fn process_batch(&self, items: Vec<WorkItem>, actor: &str) -> Result<BatchReport> {
        if items.is_empty() {
            return Err(CuratorError::Validation("cannot process an empty batch".into()));
        }

        let mut report = BatchReport::default();
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let (item_id, url) = (item.id.clone(), item.url.clone());
            match self.lifecycle.ingest(item, actor).await {
                Ok(record) => candidates.push(record),
                Err(CuratorError::Duplicate { existing, .. }) => report.skipped.push(Skipped {
                    item_id,
                    url,
                    existing: Some(existing),
                    reason: "duplicate url".into(),
                }),
                Err(CuratorError::Validation(reason)) => report.skipped.push(Skipped {
                    item_id,
                    url,
                    existing: None,
                    reason,
                }),
                Err(err) => return Err(err),
            }
        }
        if candidates.is_empty() {
            info!(skipped = report.skipped.len(), "batch contained no new candidates");
            return Ok(report);
        }

        let batch: Vec<WorkItem> = candidates.iter().map(|r| r.item.clone()).collect();
        let outcomes = match self.policy {
            FallbackPolicy::Degrade => self
                .scorer
                .score_batch(&batch)
                .await?
                .into_iter()
                .map(Ok)
                .collect::<Vec<_>>(),
            FallbackPolicy::Enqueue => self.scorer.score_primary(&batch).await?,
        };

        for (record, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                Ok(score) => {
                    let archived = self.lifecycle.archive(record.id, score, actor).await?;
                    report.archived.push(archived);
                }
                Err(err) if err.is_recoverable() => {
                    let entry = self
                        .queue
                        .enqueue(record.item, err.to_string(), SCORING_STAGE)
                        .await?;
                    report.enqueued.push(entry);
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            archived = report.archived.len(),
            accepted = report.accepted(),
            fallback = report.fallback_scored(),
            enqueued = report.enqueued.len(),
            skipped = report.skipped.len(),
            scorer = self.scorer.id(),
            "batch processed"
        );
        Ok(report)
    }

    /// Retries primary scoring for up to `limit` queued items.
    pub async fn reprocess(&self, limit: usize, actor: &str) -> Result<ReprocessReport> {
        ensure_allowed(self.capability.as_ref(), actor, Action::Reprocess)?;
        let entries = self.queue.dequeue_batch(SCORING_STAGE, limit).await?;
        let mut report = ReprocessReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let items: Vec<WorkItem> = entries.iter().map(|e| e.item.clone()).collect();
        let outcomes = self.scorer.score_primary(&items).await?;

        for (entry, outcome) in entries.into_iter().zip(outcomes) {
            let candidate = self.candidate_for(&entry.item).await?;
            let Some(candidate) = candidate else {
                warn!(entry = %entry.id, item = %entry.item.id, "queued item has no open candidate, dropping entry");
                self.queue.mark_attempt(entry.id, true, None).await?;
                report.settled += 1;
                continue;
            };

            match outcome {
                Ok(score) => {
                    self.lifecycle.archive(candidate.id, score, actor).await?;
                    self.queue.mark_attempt(entry.id, true, None).await?;
                    report.archived += 1;
                }
                Err(err) if err.is_recoverable() => {
                    match self.queue.mark_attempt(entry.id, false, Some(err.to_string())).await? {
                        AttemptOutcome::Exhausted { .. } => report.exhausted += 1,
                        AttemptOutcome::Retrying { .. } => report.retrying += 1,
                        AttemptOutcome::Removed => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            archived = report.archived,
            retrying = report.retrying,
            exhausted = report.exhausted,
            "retry queue reprocessed"
        );
        Ok(report)
    }

    async fn candidate_for(&self, item: &WorkItem) -> Result<Option<CandidateRecord>> {
        Ok(self
            .store
            .find_by_url(&item.url)
            .await?
            .into_iter()
            .find(|r| r.stage == Stage::Candidate && r.item.id == item.id))
    }
}

/// Exposes [`Curator::process_batch`] as a pipeline callback.
///
/// Reads items from the step input: either an array of items or an object
/// with an `items` array.
pub struct ScoreItemsHandler {
    curator: Arc<Curator>,
    actor: String,
}

impl ScoreItemsHandler {
    pub fn new(curator: Arc<Curator>, actor: impl Into<String>) -> Self {
        Self {
            curator,
            actor: actor.into(),
        }
    }
}

#[async_trait]
impl StepHandler for ScoreItemsHandler {
    async fn call(&self, ctx: &ExecutionContext) -> anyhow::Result<Value> {
        let input = ctx.input();
        let raw = input.get("items").unwrap_or(input).clone();
        let items: Vec<WorkItem> = serde_json::from_value(raw)
            .map_err(|e| anyhow::anyhow!("step input is not a list of items: {e}"))?;

        let report = self.curator.process_batch(items, &self.actor).await?;
        let ranking: Vec<Value> = report
            .ranking()
            .into_iter()
            .map(|s| serde_json::json!({"item_id": s.item_id, "score": s.score, "fallback": s.fallback}))
            .collect();
        Ok(serde_json::json!({
            "archived": report.archived.len(),
            "accepted": report.accepted(),
            "fallback": report.fallback_scored(),
            "enqueued": report.enqueued.len(),
            "skipped": report.skipped.len(),
            "ranking": ranking,
        }))
    }
}
