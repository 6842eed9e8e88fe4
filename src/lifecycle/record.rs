use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::Stage;
use crate::model::{ScoreResult, WorkItem};

/// One audited stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// `None` for the ingest that created the record.
    pub from: Option<Stage>,
    pub to: Stage,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// A work item moving through the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub item: WorkItem,
    pub stage: Stage,
    pub score: Option<ScoreResult>,
    /// Set once published; derived from the record id.
    pub content_id: Option<String>,
    pub history: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    pub fn new(item: WorkItem) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            item,
            stage: Stage::Candidate,
            score: None,
            content_id: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `to` and appends the audit entry.
    pub(crate) fn advance(&mut self, to: Stage, actor: &str) {
        let now = Utc::now();
        self.history.push(TransitionRecord {
            from: Some(self.stage),
            to,
            actor: actor.to_string(),
            at: now,
        });
        self.stage = to;
        self.updated_at = now;
    }

    pub(crate) fn record_creation(&mut self, actor: &str) {
        self.history.push(TransitionRecord {
            from: None,
            to: self.stage,
            actor: actor.to_string(),
            at: self.created_at,
        });
    }

    /// Content id used when publishing; stable across retries.
    pub fn publish_key(&self) -> String {
        format!("content-{}", self.id)
    }
}

/// Audit summary of a record's journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub url: String,
    pub stage: Stage,
    pub stages: Vec<Stage>,
    pub actors: Vec<String>,
    pub score: Option<u8>,
    pub fallback_scored: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    pub fn from_record(record: &CandidateRecord) -> Self {
        let duration = record.updated_at - record.created_at;
        Self {
            record_id: record.id,
            url: record.item.url.clone(),
            stage: record.stage,
            stages: record.history.iter().map(|t| t.to).collect(),
            actors: record.history.iter().map(|t| t.actor.clone()).collect(),
            score: record.score.as_ref().map(|s| s.score),
            fallback_scored: record.score.as_ref().is_some_and(|s| s.fallback),
            started_at: record.created_at,
            updated_at: record.updated_at,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
