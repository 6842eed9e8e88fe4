//! Pluggable scorers.
//!
//! Every scorer maps a [`WorkItem`] to a [`ScoreResult`] through the same
//! [`Scorer`] contract. [`KeywordScorer`] is deterministic and offline;
//! [`SemanticScorer`] asks a generation adapter and degrades to a
//! `KeywordScorer` when the adapter lets it down.

mod keyword;
mod semantic;
mod weights;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ScoreResult, WorkItem};

pub use keyword::{CONTENT_QUALITY, FRESHNESS, KEYWORD_RELEVANCE, KeywordScorer, Keywords, parse_date};
pub use semantic::SemanticScorer;
pub use weights::{CriterionWeights, NEUTRAL_SCORE};

/// Maps items to scores. Implementations must be safe to share across tasks.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Identifier recorded in every result this scorer produces.
    fn id(&self) -> &str;

    async fn score_item(&self, item: &WorkItem) -> Result<ScoreResult>;

    /// Scores many items. The results match calling [`Scorer::score_item`]
    /// on each item in order; an empty batch is a validation error.
    async fn score_batch(&self, items: &[WorkItem]) -> Result<Vec<ScoreResult>>;

    /// Scores without degrading: one entry per item, `Err` wherever the
    /// scorer would otherwise have fallen back. Scorers with nothing to fall
    /// back from never fail per item.
    async fn score_primary(&self, items: &[WorkItem]) -> Result<Vec<Result<ScoreResult>>> {
        Ok(self.score_batch(items).await?.into_iter().map(Ok).collect())
    }
}
