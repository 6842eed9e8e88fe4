//! Semantic scoring through a generation adapter, degrading to the keyword
//! scorer whenever the adapter cannot produce a usable analysis.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{CriterionWeights, KeywordScorer, Scorer};
use crate::adapters::{GenerationAdapter, GenerationOptions};
use crate::config::ScoringConfig;
use crate::error::{CuratorError, Result};
use crate::model::{Recommendation, ScoreResult, WorkItem};

const SYSTEM_PROMPT: &str = "You are a content analyst. You rate content items against weighted \
criteria and answer with valid JSON only, no prose and no Markdown.";

/// Body text beyond this many characters is not sent to the adapter.
const MAX_BODY_CHARS: usize = 4000;

/// One item's analysis as returned by the adapter.
#[derive(Debug, Deserialize)]
struct Analysis {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    criteria: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchAnalysis {
    results: Vec<Analysis>,
}

/// Scorer backed by an injected [`GenerationAdapter`].
///
/// Adapter failures, timeouts, unparsable output and missing required fields
/// all degrade to the keyword scorer; those results carry `fallback = true`.
/// A permanent adapter failure marks the adapter unavailable, after which
/// calls go straight to the fallback until [`reset_availability`] is called.
///
/// [`reset_availability`]: SemanticScorer::reset_availability
pub struct SemanticScorer<G> {
    adapter: G,
    fallback: KeywordScorer,
    weights: CriterionWeights,
    options: GenerationOptions,
    chunk_size: usize,
    timeout: Duration,
    approve_threshold: u8,
    review_threshold: u8,
    unavailable: AtomicBool,
}

impl<G: GenerationAdapter> SemanticScorer<G> {
    pub fn new(adapter: G, fallback: KeywordScorer, weights: CriterionWeights) -> Self {
        let defaults = ScoringConfig::default();
        Self {
            adapter,
            fallback,
            weights,
            options: GenerationOptions::default(),
            chunk_size: defaults.chunk_size,
            timeout: defaults.adapter_timeout(),
            approve_threshold: defaults.approve_threshold,
            review_threshold: defaults.review_threshold,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn from_config(adapter: G, config: &ScoringConfig) -> Result<Self> {
        let fallback = KeywordScorer::from_config(config)?;
        Ok(Self::new(adapter, fallback, config.semantic_weights()?)
            .with_chunk_size(config.chunk_size)
            .with_timeout(config.adapter_timeout())
            .with_thresholds(config.approve_threshold, config.review_threshold))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_thresholds(mut self, approve: u8, review: u8) -> Self {
        self.approve_threshold = approve;
        self.review_threshold = review;
        self
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    pub fn reset_availability(&self) {
        self.unavailable.store(false, Ordering::Relaxed);
    }

    /// Primary scoring only; no fallback.
    pub async fn try_score_item(&self, item: &WorkItem) -> Result<ScoreResult> {
        let content = self.call_adapter(&self.item_prompt(item)).await?;
        let analysis: Analysis = serde_json::from_str(extract_json(&content)?)
            .map_err(|e| CuratorError::MalformedResponse(format!("analysis is not valid JSON: {e}")))?;
        self.to_result(item, analysis)
    }

    /// Primary scoring of one chunk in a single adapter call.
    ///
    /// The outer error means the call itself failed. Inner errors are items
    /// the response left out or described incompletely.
    pub async fn try_score_chunk(&self, items: &[WorkItem]) -> Result<Vec<Result<ScoreResult>>> {
        let content = self.call_adapter(&self.batch_prompt(items)).await?;
        let batch: BatchAnalysis = serde_json::from_str(extract_json(&content)?).map_err(|e| {
            CuratorError::MalformedResponse(format!("batch analysis is not valid JSON: {e}"))
        })?;

        let mut by_id: HashMap<String, Analysis> = HashMap::new();
        for analysis in batch.results {
            if let Some(id) = analysis.id.as_ref().and_then(id_string) {
                by_id.insert(id, analysis);
            }
        }

        Ok(items
            .iter()
            .map(|item| match by_id.remove(&item.id) {
                Some(analysis) => self.to_result(item, analysis),
                None => Err(CuratorError::MalformedResponse(format!(
                    "no analysis returned for item {}",
                    item.id
                ))),
            })
            .collect())
    }

    /// Primary scoring of a whole batch, chunked; one result per input item.
    pub async fn try_score_batch(&self, items: &[WorkItem]) -> Result<Vec<Result<ScoreResult>>> {
        if items.is_empty() {
            return Err(CuratorError::Validation("cannot score an empty batch".into()));
        }
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.chunk_size) {
            match self.try_score_chunk(chunk).await {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(err) => {
                    debug!(chunk = chunk.len(), error = %err, "semantic chunk failed");
                    results.extend(chunk.iter().map(|_| Err(replicate(&err))));
                }
            }
        }
        Ok(results)
    }

    async fn call_adapter(&self, prompt: &str) -> Result<String> {
        if !self.is_available() {
            return Err(CuratorError::AdapterUnavailable {
                message: "adapter marked unavailable after a permanent failure".into(),
                permanent: true,
            });
        }

        let outcome = tokio::time::timeout(
            self.timeout,
            self.adapter.chat(SYSTEM_PROMPT, prompt, &self.options),
        )
        .await;

        match outcome {
            Ok(Ok(generation)) => {
                debug!(
                    input_tokens = generation.usage.input_tokens,
                    output_tokens = generation.usage.output_tokens,
                    "semantic analysis received"
                );
                Ok(generation.content)
            }
            Ok(Err(err)) => {
                if err.is_permanent() {
                    warn!(error = %err, "generation adapter failed permanently, disabling it");
                    self.unavailable.store(true, Ordering::Relaxed);
                }
                Err(err)
            }
            Err(_) => Err(CuratorError::adapter(format!(
                "generation timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn to_result(&self, item: &WorkItem, analysis: Analysis) -> Result<ScoreResult> {
        let raw = analysis.criteria.ok_or_else(|| {
            CuratorError::MalformedResponse(format!("analysis for {} lacks criteria", item.id))
        })?;
        let reported = analysis.score.ok_or_else(|| {
            CuratorError::MalformedResponse(format!("analysis for {} lacks score", item.id))
        })?;

        let criteria: BTreeMap<String, u8> = raw
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k, v.round().clamp(0.0, 100.0) as u8))
            .collect();
        let score = self.weights.aggregate(&criteria);
        if (reported - f64::from(score)).abs() > 5.0 {
            debug!(item = %item.id, reported, computed = score, "adapter score disagrees with weighted criteria");
        }

        Ok(ScoreResult {
            item_id: item.id.clone(),
            score,
            criteria,
            rationale: analysis.rationale.unwrap_or_default(),
            scorer: self.id().to_string(),
            fallback: false,
            recommendation: Recommendation::from_score(
                score,
                self.approve_threshold,
                self.review_threshold,
            ),
        })
    }

    fn criteria_block(&self) -> String {
        self.weights
            .iter()
            .map(|(name, weight)| format!("- {name} (weight {weight:.0}%)"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn criteria_schema(&self) -> String {
        self.weights
            .criteria()
            .map(|name| format!("\"{name}\": <0-100>"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn item_prompt(&self, item: &WorkItem) -> String {
        format!(
            "Rate this content item from 0 to 100 on each criterion.\n\
             Criteria:\n{criteria}\n\
             \n\
             Respond with ONLY valid JSON in this format:\n\
             {{\"criteria\": {{{schema}}}, \"score\": <weighted 0-100>, \"rationale\": \"<one sentence>\"}}\n\
             \n\
             {item}",
            criteria = self.criteria_block(),
            schema = self.criteria_schema(),
            item = describe(item),
        )
    }

    fn batch_prompt(&self, items: &[WorkItem]) -> String {
        let listing = items
            .iter()
            .map(|item| format!("### id: {}\n{}", item.id, describe(item)))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "Rate each content item below from 0 to 100 on each criterion.\n\
             Criteria:\n{criteria}\n\
             \n\
             Respond with ONLY valid JSON in this format, one entry per item, echoing its id:\n\
             {{\"results\": [{{\"id\": \"<id>\", \"criteria\": {{{schema}}}, \"score\": <weighted 0-100>, \"rationale\": \"<one sentence>\"}}]}}\n\
             \n\
             {listing}",
            criteria = self.criteria_block(),
            schema = self.criteria_schema(),
        )
    }
}

#[async_trait]
impl<G: GenerationAdapter> Scorer for SemanticScorer<G> {
    fn id(&self) -> &str {
        "semantic"
    }

    async fn score_item(&self, item: &WorkItem) -> Result<ScoreResult> {
        match self.try_score_item(item).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_recoverable() => {
                warn!(item = %item.id, error = %err, "semantic scoring failed, using keyword fallback");
                Ok(self.fallback.evaluate(item).as_fallback())
            }
            Err(err) => Err(err),
        }
    }

    async fn score_batch(&self, items: &[WorkItem]) -> Result<Vec<ScoreResult>> {
        let attempts = self.try_score_batch(items).await?;
        let mut degraded = 0usize;
        let results = items
            .iter()
            .zip(attempts)
            .map(|(item, attempt)| match attempt {
                Ok(result) => Ok(result),
                Err(err) if err.is_recoverable() => {
                    degraded += 1;
                    debug!(item = %item.id, error = %err, "item falls back to keyword scoring");
                    Ok(self.fallback.evaluate(item).as_fallback())
                }
                Err(err) => Err(err),
            })
            .collect::<Result<Vec<_>>>()?;
        if degraded > 0 {
            warn!(degraded, total = items.len(), "semantic batch partially degraded to keyword fallback");
        }
        Ok(results)
    }

    async fn score_primary(&self, items: &[WorkItem]) -> Result<Vec<Result<ScoreResult>>> {
        self.try_score_batch(items).await
    }
}

fn describe(item: &WorkItem) -> String {
    let body: String = item.body.chars().take(MAX_BODY_CHARS).collect();
    let mut text = format!("Title: {}\nURL: {}", item.title, item.url);
    if let Some(published) = &item.published_at {
        text.push_str(&format!("\nPublished: {published}"));
    }
    if !body.is_empty() {
        text.push_str(&format!("\nBody: {body}"));
    }
    text
}

/// Cuts the outermost JSON object out of a reply, tolerating code fences
/// and chatter around it.
fn extract_json(text: &str) -> Result<&str> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(&text[start..=end]),
        _ => Err(CuratorError::MalformedResponse(
            "reply contains no JSON object".into(),
        )),
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Copies a chunk-level failure onto each item of the chunk.
fn replicate(err: &CuratorError) -> CuratorError {
    match err {
        CuratorError::AdapterUnavailable { message, permanent } => CuratorError::AdapterUnavailable {
            message: message.clone(),
            permanent: *permanent,
        },
        other => CuratorError::MalformedResponse(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Generation, Usage};
    use crate::scoring::Keywords;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    // --- Mock adapters ---

    struct ScriptedAdapter {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationAdapter for ScriptedAdapter {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
            self.chat("", prompt, options).await
        }

        async fn chat(&self, _system: &str, _user: &str, _options: &GenerationOptions) -> Result<Generation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CuratorError::adapter("script exhausted")));
            reply.map(|content| Generation {
                content,
                usage: Usage::default(),
            })
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl GenerationAdapter for SlowAdapter {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
            self.chat("", prompt, options).await
        }

        async fn chat(&self, _system: &str, _user: &str, _options: &GenerationOptions) -> Result<Generation> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Generation {
                content: "{}".into(),
                usage: Usage::default(),
            })
        }
    }

    fn keyword() -> KeywordScorer {
        let config = ScoringConfig {
            keywords: Keywords::new(&["discovery"], &[]),
            ..ScoringConfig::default()
        };
        KeywordScorer::from_config(&config)
            .unwrap()
            .with_reference_time(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap())
    }

    fn scorer<G: GenerationAdapter>(adapter: G) -> SemanticScorer<G> {
        let weights = ScoringConfig::default().semantic_weights().unwrap();
        SemanticScorer::new(adapter, keyword(), weights)
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("Item {i}"), format!("https://x/{i}")).with_id(format!("item-{i}")))
            .collect()
    }

    fn analysis(id: &str) -> String {
        format!(
            r#"{{"id": "{id}", "criteria": {{"relevance": 90, "quality": 80, "novelty": 70, "credibility": 60}}, "score": 79, "rationale": "solid"}}"#
        )
    }

    #[tokio::test]
    async fn parses_single_analysis() {
        let reply = "```json\n{\"criteria\": {\"relevance\": 90, \"quality\": 80, \"novelty\": 70, \"credibility\": 60}, \"score\": 79, \"rationale\": \"solid\"}\n```";
        let s = scorer(ScriptedAdapter::new(vec![Ok(reply.into())]));
        let item = WorkItem::new("Anything", "https://x");
        let result = s.score_item(&item).await.unwrap();
        // 90*.40 + 80*.25 + 70*.20 + 60*.15 = 79
        assert_eq!(result.score, 79);
        assert_eq!(result.scorer, "semantic");
        assert!(!result.fallback);
        assert_eq!(result.rationale, "solid");
        assert_eq!(result.recommendation, Recommendation::Approve);
    }

    #[tokio::test]
    async fn missing_criteria_use_neutral_score() {
        let reply = r#"{"criteria": {"relevance": 100}, "score": 70}"#;
        let s = scorer(ScriptedAdapter::new(vec![Ok(reply.into())]));
        let result = s.score_item(&WorkItem::new("A", "https://a")).await.unwrap();
        // 100*.40 + 50*.60 = 70
        assert_eq!(result.score, 70);
        assert!(!result.fallback);
    }

    #[tokio::test]
    async fn adapter_error_falls_back() {
        let s = scorer(ScriptedAdapter::new(vec![Err(CuratorError::adapter("connection refused"))]));
        let item = WorkItem::new("Shocking discovery revealed", "https://b");
        let result = s.score_item(&item).await.unwrap();
        assert!(result.fallback);
        assert_eq!(result.scorer, "keyword");
        assert_eq!(result, keyword().evaluate(&item).as_fallback());
    }

    #[tokio::test]
    async fn malformed_or_incomplete_reply_falls_back() {
        for reply in ["not json at all", r#"{"criteria": {"relevance": 10}}"#, r#"{"score": 10}"#] {
            let s = scorer(ScriptedAdapter::new(vec![Ok(reply.into())]));
            let result = s.score_item(&WorkItem::new("A", "https://a")).await.unwrap();
            assert!(result.fallback, "reply {reply:?} should fall back");
        }
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let s = scorer(SlowAdapter).with_timeout(Duration::from_millis(20));
        let result = s.score_item(&WorkItem::new("A", "https://a")).await.unwrap();
        assert!(result.fallback);
    }

    #[tokio::test]
    async fn failing_adapter_batch_equals_keyword_batch() {
        let s = scorer(ScriptedAdapter::new(vec![])).with_chunk_size(2);
        let batch = items(5);
        let semantic = s.score_batch(&batch).await.unwrap();
        let direct: Vec<ScoreResult> = keyword()
            .score_batch(&batch)
            .await
            .unwrap()
            .into_iter()
            .map(ScoreResult::as_fallback)
            .collect();
        assert_eq!(semantic, direct);
    }

    #[tokio::test]
    async fn batch_is_chunked_and_missing_ids_fall_back() {
        let chunk_one = format!(
            r#"{{"results": [{}, {}, {}, {}]}}"#,
            analysis("item-0"),
            analysis("item-1"),
            analysis("item-2"),
            analysis("item-4")
        );
        let chunk_two = format!(r#"{{"results": [{}, {}]}}"#, analysis("item-5"), analysis("item-6"));
        let adapter = ScriptedAdapter::new(vec![Ok(chunk_one), Ok(chunk_two)]);
        let s = scorer(adapter).with_chunk_size(5);

        let results = s.score_batch(&items(7)).await.unwrap();
        assert_eq!(s.adapter.calls(), 2);
        assert_eq!(results.len(), 7);
        let fallbacks: Vec<&str> = results
            .iter()
            .filter(|r| r.fallback)
            .map(|r| r.item_id.as_str())
            .collect();
        assert_eq!(fallbacks, vec!["item-3"]);
        for (result, item) in results.iter().zip(items(7)) {
            assert_eq!(result.item_id, item.id);
        }
    }

    #[tokio::test]
    async fn permanent_failure_disables_adapter() {
        let adapter = ScriptedAdapter::new(vec![Err(CuratorError::AdapterUnavailable {
            message: "401 invalid api key".into(),
            permanent: true,
        })]);
        let s = scorer(adapter);
        let first = s.score_item(&WorkItem::new("A", "https://a")).await.unwrap();
        assert!(first.fallback);
        assert!(!s.is_available());

        let second = s.score_item(&WorkItem::new("B", "https://b")).await.unwrap();
        assert!(second.fallback);
        assert_eq!(s.adapter.calls(), 1);

        s.reset_availability();
        assert!(s.is_available());
    }

    #[tokio::test]
    async fn transient_failure_keeps_adapter_enabled() {
        let s = scorer(ScriptedAdapter::new(vec![Err(CuratorError::adapter("503"))]));
        s.score_item(&WorkItem::new("A", "https://a")).await.unwrap();
        assert!(s.is_available());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let s = scorer(ScriptedAdapter::new(vec![]));
        assert!(matches!(s.score_batch(&[]).await, Err(CuratorError::Validation(_))));
    }

    #[test]
    fn extract_json_handles_fences_and_chatter() {
        assert_eq!(extract_json("Sure! {\"a\": 1} hope it helps").unwrap(), "{\"a\": 1}");
        assert!(extract_json("nothing here").is_err());
        assert!(extract_json("} backwards {").is_err());
    }

    #[test]
    fn prompt_lists_weighted_criteria() {
        let s = scorer(ScriptedAdapter::new(vec![]));
        let prompt = s.item_prompt(&WorkItem::new("Hello", "https://h").with_body("world"));
        assert!(prompt.contains("- relevance (weight 40%)"));
        assert!(prompt.contains("\"credibility\": <0-100>"));
        assert!(prompt.contains("Title: Hello"));
        assert!(prompt.contains("Body: world"));
    }

    struct ModelEcho;

    #[async_trait]
    impl GenerationAdapter for ModelEcho {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
            self.chat("", prompt, options).await
        }

        async fn chat(&self, _system: &str, _user: &str, options: &GenerationOptions) -> Result<Generation> {
            let model = options.model.clone().unwrap_or_default();
            Ok(Generation {
                content: format!(
                    r#"{{"criteria": {{"relevance": 100, "quality": 100, "novelty": 100, "credibility": 100}}, "score": 100, "rationale": "{model}"}}"#
                ),
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn generation_options_reach_the_adapter() {
        let s = scorer(ModelEcho).with_options(GenerationOptions {
            model: Some("small-model".into()),
            ..GenerationOptions::default()
        });
        let result = s.score_item(&WorkItem::new("A", "https://a")).await.unwrap();
        assert_eq!(result.rationale, "small-model");
        assert_eq!(result.score, 100);
    }
}
