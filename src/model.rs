//! Core records shared by the scorers, the retry queue and the lifecycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unit of content under evaluation.
///
/// `url` is the canonical URL and doubles as the dedup key. `published_at`
/// holds the raw date text as ingested; scorers parse it on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    // Generated when the input omits it.
    #[serde(default = "new_item_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    // Feed or origin label, free text.
    #[serde(default)]
    pub source: String,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}

impl WorkItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: new_item_id(),
            title: title.into(),
            body: String::new(),
            source: String::new(),
            url: url.into(),
            published_at: None,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_published(mut self, published: impl Into<String>) -> Self {
        self.published_at = Some(published.into());
        self
    }

    /// Title and body joined, the text every scorer looks at.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }
}

/// What a scorer suggests doing with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    Review,
    Reject,
}

impl Recommendation {
    /// `Approve` at or above `approve_at`, `Review` at or above `review_at`.
    pub fn from_score(score: u8, approve_at: u8, review_at: u8) -> Self {
        if score >= approve_at {
            Recommendation::Approve
        } else if score >= review_at {
            Recommendation::Review
        } else {
            Recommendation::Reject
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Approve => write!(f, "approve"),
            Recommendation::Review => write!(f, "review"),
            Recommendation::Reject => write!(f, "reject"),
        }
    }
}

/// Output of exactly one scorer invocation for one item. Never mutated;
/// re-scoring produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub item_id: String,
    /// Weighted aggregate of `criteria`, 0..=100.
    pub score: u8,
    // Per-criterion scores, each 0..=100.
    pub criteria: BTreeMap<String, u8>,
    pub rationale: String,
    /// Identifier of the scorer that produced the numbers.
    pub scorer: String,
    /// Set when a primary scorer degraded to its fallback.
    pub fallback: bool,
    pub recommendation: Recommendation,
}

impl ScoreResult {
    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

/// Orders results best first; ties break on item id so the order is stable.
pub fn rank<'a>(results: impl IntoIterator<Item = &'a ScoreResult>) -> Vec<&'a ScoreResult> {
    let mut ranked: Vec<&ScoreResult> = results.into_iter().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.item_id.cmp(&b.item_id)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, score: u8) -> ScoreResult {
        ScoreResult {
            item_id: id.into(),
            score,
            criteria: BTreeMap::new(),
            rationale: String::new(),
            scorer: "keyword".into(),
            fallback: false,
            recommendation: Recommendation::Review,
        }
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(Recommendation::from_score(70, 70, 40), Recommendation::Approve);
        assert_eq!(Recommendation::from_score(69, 70, 40), Recommendation::Review);
        assert_eq!(Recommendation::from_score(40, 70, 40), Recommendation::Review);
        assert_eq!(Recommendation::from_score(39, 70, 40), Recommendation::Reject);
    }

    #[test]
    fn rank_orders_by_score_then_id() {
        let results = vec![result("b", 50), result("a", 50), result("c", 90)];
        let ids: Vec<&str> = rank(&results).iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn rank_accepts_borrowed_results() {
        let held = [Some(result("z", 10)), None, Some(result("y", 10)), Some(result("x", 70))];
        let ids: Vec<&str> = rank(held.iter().flatten())
            .iter()
            .map(|r| r.item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn work_item_deserializes_with_defaults() {
        let item: WorkItem =
            serde_json::from_str(r#"{"title": "Cats everywhere", "url": "https://a"}"#).unwrap();
        assert_eq!(item.title, "Cats everywhere");
        assert!(item.body.is_empty());
        assert!(item.published_at.is_none());
        assert!(!item.id.is_empty());
    }

    #[test]
    fn text_skips_empty_body() {
        let item = WorkItem::new("Title", "https://x");
        assert_eq!(item.text(), "Title");
        let item = item.with_body("Body");
        assert_eq!(item.text(), "Title\nBody");
    }

    #[test]
    fn fallback_tag() {
        let r = result("a", 10).as_fallback();
        assert!(r.fallback);
    }
}
