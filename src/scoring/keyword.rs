use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;

use super::{CriterionWeights, NEUTRAL_SCORE, Scorer};
use crate::config::ScoringConfig;
use crate::error::{CuratorError, Result};
use crate::model::{Recommendation, ScoreResult, WorkItem};

pub const KEYWORD_RELEVANCE: &str = "keyword_relevance";
pub const FRESHNESS: &str = "freshness";
pub const CONTENT_QUALITY: &str = "content_quality";

/// Freshness assumed when an item carries no parseable date.
const UNDATED_FRESHNESS: u8 = 70;
const PRIMARY_SHARE: f64 = 0.7;
const SECONDARY_SHARE: f64 = 0.3;

/// Age thresholds in days and the freshness they earn.
const FRESHNESS_STEPS: &[(f64, u8)] = &[(1.0, 100), (7.0, 90), (30.0, 75), (90.0, 50), (180.0, 30)];
const STALE_FRESHNESS: u8 = 10;

/// Keyword lists the relevance criterion matches against.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Keywords {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
}

impl Keywords {
    pub fn new(primary: &[&str], secondary: &[&str]) -> Self {
        Self {
            primary: primary.iter().map(|s| s.to_string()).collect(),
            secondary: secondary.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Deterministic scorer: keyword relevance, freshness and content length.
///
/// Makes no network calls and never fails on a well-formed item. Given the
/// same item, keywords, weights and reference time it always returns the
/// same result.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    primary: Vec<(String, Regex)>,
    secondary: Vec<(String, Regex)>,
    weights: CriterionWeights,
    approve_threshold: u8,
    review_threshold: u8,
    reference_time: Option<DateTime<Utc>>,
}

fn compile(keywords: &[String]) -> Result<Vec<(String, Regex)>> {
    keywords
        .iter()
        .map(|kw| kw.trim())
        .filter(|kw| !kw.is_empty())
        .map(|kw| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(kw));
            Regex::new(&pattern)
                .map(|re| (kw.to_string(), re))
                .map_err(|e| CuratorError::Validation(format!("bad keyword {kw}: {e}")))
        })
        .collect()
}

impl KeywordScorer {
    pub fn new(keywords: &Keywords, weights: CriterionWeights) -> Result<Self> {
        let defaults = ScoringConfig::default();
        Ok(Self {
            primary: compile(&keywords.primary)?,
            secondary: compile(&keywords.secondary)?,
            weights,
            approve_threshold: defaults.approve_threshold,
            review_threshold: defaults.review_threshold,
            reference_time: None,
        })
    }

    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        Ok(Self::new(&config.keywords, config.keyword_criterion_weights()?)?
            .with_thresholds(config.approve_threshold, config.review_threshold))
    }

    pub fn with_thresholds(mut self, approve: u8, review: u8) -> Self {
        self.approve_threshold = approve;
        self.review_threshold = review;
        self
    }

    /// Pins "now" for freshness so results do not drift with the clock.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    /// Scores one item synchronously.
    pub fn evaluate(&self, item: &WorkItem) -> ScoreResult {
        let text = item.text();
        let (relevance, matched) = self.keyword_relevance(&text);
        let now = self.reference_time.unwrap_or_else(Utc::now);
        let freshness = freshness(item.published_at.as_deref(), now);
        let quality = content_quality(item);

        let criteria = BTreeMap::from([
            (KEYWORD_RELEVANCE.to_string(), relevance),
            (FRESHNESS.to_string(), freshness),
            (CONTENT_QUALITY.to_string(), quality),
        ]);
        let score = self.weights.aggregate(&criteria);

        let mut rationale = format!(
            "keyword relevance {relevance}, freshness {freshness}, content quality {quality}"
        );
        if !matched.is_empty() {
            rationale.push_str(&format!("; matched: {}", matched.join(", ")));
        }

        ScoreResult {
            item_id: item.id.clone(),
            score,
            criteria,
            rationale,
            scorer: self.id().to_string(),
            fallback: false,
            recommendation: Recommendation::from_score(
                score,
                self.approve_threshold,
                self.review_threshold,
            ),
        }
    }

    fn keyword_relevance(&self, text: &str) -> (u8, Vec<String>) {
        let mut matched = Vec::new();
        let mut fraction = |keywords: &[(String, Regex)]| -> f64 {
            let hits = keywords
                .iter()
                .filter(|(kw, re)| {
                    let hit = re.is_match(text);
                    if hit {
                        matched.push(kw.clone());
                    }
                    hit
                })
                .count();
            hits as f64 / keywords.len() as f64
        };

        let relevance = match (self.primary.is_empty(), self.secondary.is_empty()) {
            (true, true) => return (NEUTRAL_SCORE, matched),
            (false, true) => fraction(&self.primary),
            (true, false) => fraction(&self.secondary),
            (false, false) => {
                let primary = fraction(&self.primary);
                let secondary = fraction(&self.secondary);
                primary * PRIMARY_SHARE + secondary * SECONDARY_SHARE
            }
        };
        ((relevance * 100.0).round() as u8, matched)
    }
}

#[async_trait]
impl Scorer for KeywordScorer {
    fn id(&self) -> &str {
        "keyword"
    }

    async fn score_item(&self, item: &WorkItem) -> Result<ScoreResult> {
        Ok(self.evaluate(item))
    }

    async fn score_batch(&self, items: &[WorkItem]) -> Result<Vec<ScoreResult>> {
        if items.is_empty() {
            return Err(CuratorError::Validation("cannot score an empty batch".into()));
        }
        Ok(items.iter().map(|item| self.evaluate(item)).collect())
    }
}

/// Parses RFC 3339, RFC 2822 or a bare `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn freshness(published: Option<&str>, now: DateTime<Utc>) -> u8 {
    let Some(date) = published.and_then(parse_date) else {
        return UNDATED_FRESHNESS;
    };
    let age_days = (now - date).num_seconds() as f64 / 86_400.0;
    FRESHNESS_STEPS
        .iter()
        .find(|(max_days, _)| age_days <= *max_days)
        .map(|(_, score)| *score)
        .unwrap_or(STALE_FRESHNESS)
}

fn content_quality(item: &WorkItem) -> u8 {
    let source = if item.body.trim().is_empty() {
        &item.title
    } else {
        &item.body
    };
    match source.split_whitespace().count() {
        n if n < 20 => 20,
        n if n < 50 => 40,
        n if n < 100 => 60,
        n if n <= 500 => 100,
        n if n <= 1000 => 80,
        _ => 60,
    }
}
