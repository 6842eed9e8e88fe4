use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::condition::evaluate;
use super::context::{ExecutionContext, PREVIOUS_RESULT};
use super::execution::{
    CancelToken, ExecutionStatus, PipelineExecution, RetryPolicy, StepFailure, StepResult,
};
use super::handler::HandlerRegistry;
use super::step::{Pipeline, PipelineStep, StepError, StepKind};
use super::transform;
use crate::config::PipelineConfig;
use crate::error::Result;

/// Called with `(steps_processed, total_steps)` after every step.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

enum StepOutcome {
    Succeeded { output: Value, attempts: u32 },
    Failed { error: StepError, attempts: u32 },
    OutOfTime,
}

/// Runs pipelines step by step within a time budget.
#[derive(Clone)]
pub struct PipelineEngine {
    handlers: HandlerRegistry,
    http: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
    strict: bool,
    progress: Option<ProgressFn>,
}

impl PipelineEngine {
    pub fn new(handlers: HandlerRegistry, config: &PipelineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            handlers,
            http,
            timeout: config.timeout(),
            retry: RetryPolicy::from_config(config),
            strict: config.strict_interpolation,
            progress: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Runs `pipeline` to completion in the calling task.
    pub async fn run(&self, pipeline: &Pipeline, payload: Value) -> PipelineExecution {
        let execution = PipelineExecution::scheduled(pipeline, payload.clone());
        self.execute(pipeline, payload, execution, &CancelToken::new(), None)
            .await
    }

    /// Drives an existing execution record through `pipeline`. `cancel` is
    /// checked before each step; `on_step` fires alongside the engine-wide
    /// progress callback.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        payload: Value,
        mut execution: PipelineExecution,
        cancel: &CancelToken,
        on_step: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> PipelineExecution {
        let started = Instant::now();
        let total = pipeline.steps.len();
        let mut ctx = ExecutionContext::new(payload);

        execution.status = ExecutionStatus::Running;
        execution.total_steps = total;
        info!(execution = %execution.id, pipeline = %pipeline.name, total, "pipeline started");

        for (index, step) in pipeline.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                execution.status = ExecutionStatus::Cancelled;
                break;
            }
            if self.remaining(started).is_none() {
                execution.status = ExecutionStatus::Timeout;
                break;
            }

            execution.current_step = index;
            let step_started = Instant::now();
            let outcome = self.run_with_retry(step, &ctx, started).await;
            let duration_ms = u64::try_from(step_started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                StepOutcome::Succeeded { output, attempts } => {
                    debug!(step = %step.name, attempts, "step succeeded");
                    ctx.set_output(&step.name, output.clone());
                    execution.step_results.push(StepResult {
                        index,
                        name: step.name.clone(),
                        succeeded: true,
                        output,
                        attempts,
                        duration_ms,
                    });
                }
                StepOutcome::OutOfTime => {
                    execution.status = ExecutionStatus::Timeout;
                    break;
                }
                StepOutcome::Failed { error, attempts } => {
                    warn!(step = %step.name, critical = step.critical, attempts, "step failed: {error}");
                    execution.errors.push(StepFailure {
                        index,
                        name: step.name.clone(),
                        critical: step.critical,
                        attempts,
                        message: error.to_string(),
                    });
                    execution.step_results.push(StepResult {
                        index,
                        name: step.name.clone(),
                        succeeded: false,
                        output: Value::Null,
                        attempts,
                        duration_ms,
                    });
                    if step.critical {
                        execution.status = ExecutionStatus::Failed;
                        execution.failed_step = Some(index);
                        self.report(index + 1, total, on_step);
                        break;
                    }
                    ctx.clear_output(&step.name);
                }
            }

            execution.completed_steps += 1;
            self.report(execution.completed_steps, total, on_step);
        }

        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
        }
        execution.context = ctx.into_value();
        execution.finished_at = Some(Utc::now());

        info!(
            execution = %execution.id,
            status = %execution.status,
            completed = execution.completed_steps,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        execution
    }

    fn report(
        &self,
        done: usize,
        total: usize,
        on_step: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
        if let Some(on_step) = on_step {
            on_step(done, total);
        }
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.timeout
            .checked_sub(started.elapsed())
            .filter(|left| !left.is_zero())
    }

    async fn run_with_retry(
        &self,
        step: &PipelineStep,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> StepOutcome {
        let attempts = step.attempts.unwrap_or(self.retry.attempts).max(1);
        let mut attempt = 1;
        loop {
            // Every attempt, whatever the step kind, lives inside the budget.
            let Some(budget) = self.remaining(started) else {
                return StepOutcome::OutOfTime;
            };
            let error = match timeout(budget, self.run_step(step, ctx, started)).await {
                Err(_) => {
                    warn!(
                        step = %step.name,
                        attempt,
                        budget_ms = budget.as_millis() as u64,
                        "step overran the time budget"
                    );
                    return StepOutcome::OutOfTime;
                }
                Ok(Ok(output)) => return StepOutcome::Succeeded { output, attempts: attempt },
                Ok(Err(StepError::BudgetExhausted)) => return StepOutcome::OutOfTime,
                Ok(Err(error)) => error,
            };
            if attempt >= attempts || !error.is_retryable() {
                return StepOutcome::Failed { error, attempts: attempt };
            }

            let Some(remaining) = self.remaining(started) else {
                return StepOutcome::OutOfTime;
            };
            let delay = self.retry.delay_for_attempt(attempt);
            debug!(
                step = %step.name,
                attempt,
                max = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying step: {error}"
            );
            if delay >= remaining {
                sleep(remaining).await;
                return StepOutcome::OutOfTime;
            }
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run_step(
        &self,
        step: &PipelineStep,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> std::result::Result<Value, StepError> {
        match &step.kind {
            StepKind::Callback { handler } => {
                let handler = self
                    .handlers
                    .get(handler)
                    .ok_or_else(|| StepError::UnknownHandler(handler.clone()))?;
                handler
                    .call(ctx)
                    .await
                    .map_err(|e| StepError::Handler(format!("{e:#}")))
            }
            StepKind::Http {
                method,
                url,
                headers,
                body,
                timeout_secs,
            } => {
                let url = ctx.interpolate(url, self.strict)?;
                let request_timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT)
                    .min(self.remaining(started).ok_or(StepError::BudgetExhausted)?);

                let mut request = self
                    .http
                    .request((*method).into(), &url)
                    .timeout(request_timeout);
                for (name, value) in headers {
                    request = request.header(name.as_str(), ctx.interpolate(value, self.strict)?);
                }
                if let Some(body) = body {
                    request = request.json(&ctx.interpolate_value(body, self.strict)?);
                }

                let response = request.send().await.map_err(|e| StepError::Http(e.to_string()))?;
                let status = response.status();
                let text = response.text().await.map_err(|e| StepError::Http(e.to_string()))?;
                if !status.is_success() {
                    return Err(StepError::HttpStatus {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
            }
            StepKind::Transform { source, ops } => {
                let input = match source {
                    Some(path) => ctx.get(path).cloned().unwrap_or(Value::Null),
                    None => ctx.input().clone(),
                };
                transform::apply(ops, input)
            }
            StepKind::Condition {
                field,
                operator,
                expected,
            } => Ok(Value::Bool(evaluate(ctx.get(field), *operator, expected))),
            StepKind::Delay { millis } => {
                let wanted = Duration::from_millis(*millis);
                let remaining = self.remaining(started).ok_or(StepError::BudgetExhausted)?;
                if wanted > remaining {
                    sleep(remaining).await;
                    return Err(StepError::BudgetExhausted);
                }
                sleep(wanted).await;
                // Delays pass the previous output through unchanged.
                Ok(ctx.get(PREVIOUS_RESULT).cloned().unwrap_or(Value::Null))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{HttpMethod, Operator, StepHandler, TransformOp};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> PipelineConfig {
        PipelineConfig {
            timeout_secs: 10,
            step_attempts: 3,
            base_delay_ms: 1,
            workers: 1,
            strict_interpolation: false,
        }
    }

    fn doubling_registry() -> HandlerRegistry {
        HandlerRegistry::new().with_fn("double", |ctx| {
            let n = ctx
                .input()
                .get("n")
                .and_then(Value::as_i64)
                .or_else(|| ctx.input().as_i64())
                .ok_or_else(|| anyhow::anyhow!("no number in input"))?;
            Ok(json!(n * 2))
        })
    }

    #[tokio::test]
    async fn chained_callbacks_see_previous_output() {
        let engine = PipelineEngine::new(doubling_registry(), &config()).unwrap();
        let pipeline = Pipeline::new("doubles")
            .step(PipelineStep::callback("first", "double"))
            .step(PipelineStep::callback("second", "double"));

        let execution = engine.run(&pipeline, json!({"n": 2})).await;
        assert!(execution.success());
        assert_eq!(execution.completed_steps, 2);
        assert_eq!(execution.result(), &json!(8));
        assert_eq!(execution.output("first"), Some(&json!(4)));
        assert!(execution.finished_at.is_some());
        assert!(execution.errors.is_empty());
    }

    #[tokio::test]
    async fn critical_http_failure_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let registry = HandlerRegistry::new().with_fn("after", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let engine = PipelineEngine::new(registry, &config()).unwrap();
        let pipeline = Pipeline::new("fetch")
            .step(PipelineStep::http("fetch", HttpMethod::Get, format!("{}/feed", server.uri())))
            .step(PipelineStep::callback("after", "after"));

        let execution = engine.run(&pipeline, json!({})).await;
        assert!(!execution.success());
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.failed_step, Some(0));
        assert_eq!(execution.errors.len(), 1);
        assert_eq!(execution.errors[0].attempts, 3);
        assert!(execution.errors[0].message.contains("500"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_critical_failure_continues_with_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = HandlerRegistry::new().with_fn("inspect", |ctx| {
            Ok(json!({"previous_was_null": ctx.previous().is_null()}))
        });
        let engine = PipelineEngine::new(registry, &config()).unwrap();
        let pipeline = Pipeline::new("fetch")
            .step(
                PipelineStep::http("fetch", HttpMethod::Get, server.uri())
                    .non_critical()
                    .with_attempts(1),
            )
            .step(PipelineStep::callback("inspect", "inspect"));

        let execution = engine.run(&pipeline, json!({})).await;
        assert!(execution.success());
        assert_eq!(execution.completed_steps, 2);
        assert_eq!(execution.failed_step, None);
        assert_eq!(execution.errors.len(), 1);
        assert!(!execution.errors[0].critical);
        assert_eq!(execution.output("fetch"), Some(&Value::Null));
        assert_eq!(execution.result(), &json!({"previous_was_null": true}));
    }

    #[tokio::test]
    async fn http_step_interpolates_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items/42"))
            .and(header("x-source", "feed-a"))
            .and(body_json(json!({"limit": 3, "tag": "rust"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"title": "A"}]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let mut post = PipelineStep::http(
            "fetch",
            HttpMethod::Post,
            format!("{}/items/{{{{payload.id}}}}", server.uri()),
        )
        .with_body(json!({"limit": "{{payload.limit}}", "tag": "{{payload.tag}}"}));
        if let StepKind::Http { headers, .. } = &mut post.kind {
            headers.insert("x-source".into(), "{{payload.source}}".into());
        }

        let engine = PipelineEngine::new(HandlerRegistry::new(), &config()).unwrap();
        let pipeline = Pipeline::new("http")
            .step(post)
            .step(PipelineStep::http("plain", HttpMethod::Get, format!("{}/plain", server.uri())));

        let execution = engine
            .run(&pipeline, json!({"id": 42, "limit": 3, "tag": "rust", "source": "feed-a"}))
            .await;
        assert!(execution.success(), "{:?}", execution.errors);
        assert_eq!(execution.output("fetch.items.0.title"), Some(&json!("A")));
        assert_eq!(execution.output("plain"), Some(&json!("not json")));
    }

    #[tokio::test]
    async fn strict_interpolation_fails_without_retrying() {
        let mut strict = config();
        strict.strict_interpolation = true;
        let engine = PipelineEngine::new(HandlerRegistry::new(), &strict).unwrap();
        let pipeline = Pipeline::new("strict").step(PipelineStep::http(
            "fetch",
            HttpMethod::Get,
            "http://127.0.0.1:9/{{payload.missing}}",
        ));

        let execution = engine.run(&pipeline, json!({})).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.errors[0].attempts, 1);
        assert!(execution.errors[0].message.contains("payload.missing"));
    }

    #[tokio::test]
    async fn timeout_stops_between_steps() {
        let engine = PipelineEngine::new(HandlerRegistry::new(), &config())
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let pipeline = Pipeline::new("slow")
            .step(PipelineStep::delay("one", 60))
            .step(PipelineStep::delay("two", 60))
            .step(PipelineStep::delay("three", 60));

        let started = Instant::now();
        let execution = engine.run(&pipeline, json!({})).await;
        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert!(execution.completed_steps < execution.total_steps);
        assert_eq!(execution.completed_steps, 1);
        assert!(started.elapsed() < Duration::from_millis(170));
        assert!(execution.clone().into_result().is_err());
    }

    struct SleepyHandler(Duration);

    #[async_trait]
    impl StepHandler for SleepyHandler {
        async fn call(&self, _ctx: &ExecutionContext) -> anyhow::Result<Value> {
            sleep(self.0).await;
            Ok(json!("woke"))
        }
    }

    fn sleepy_engine(handler_ms: u64, budget_ms: u64) -> PipelineEngine {
        let mut registry = HandlerRegistry::new();
        registry.register("sleepy", SleepyHandler(Duration::from_millis(handler_ms)));
        PipelineEngine::new(registry, &config())
            .unwrap()
            .with_timeout(Duration::from_millis(budget_ms))
    }

    #[tokio::test]
    async fn slow_last_callback_times_out() {
        let engine = sleepy_engine(300, 100);
        let pipeline = Pipeline::new("slow").step(PipelineStep::callback("nap", "sleepy"));

        let started = Instant::now();
        let execution = engine.run(&pipeline, json!({})).await;
        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert_eq!(execution.completed_steps, 0);
        assert!(execution.completed_steps < execution.total_steps);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(matches!(
            execution.into_result(),
            Err(crate::error::CuratorError::ExecutionTimeout { completed_steps: 0, total_steps: 1 })
        ));
    }

    #[tokio::test]
    async fn slow_callback_cannot_overrun_the_budget() {
        let engine = sleepy_engine(2000, 100);
        let pipeline = Pipeline::new("slow")
            .step(PipelineStep::callback("nap", "sleepy"))
            .step(PipelineStep::delay("pause", 10));

        let started = Instant::now();
        let execution = engine.run(&pipeline, json!({})).await;
        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert_eq!(execution.completed_steps, 0);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn fast_pipeline_within_budget_completes() {
        let engine = sleepy_engine(10, 1000);
        let pipeline = Pipeline::new("quick").step(PipelineStep::callback("nap", "sleepy"));

        let execution = engine.run(&pipeline, json!({})).await;
        assert!(execution.success());
        assert_eq!(execution.result(), &json!("woke"));
    }

    #[tokio::test]
    async fn transform_and_condition_steps() {
        let engine = PipelineEngine::new(HandlerRegistry::new(), &config()).unwrap();
        let pipeline = Pipeline::new("shape")
            .step(
                PipelineStep::transform(
                    "relevant",
                    vec![
                        TransformOp::Filter {
                            field: "score".into(),
                            operator: Operator::Greater,
                            value: json!(50),
                        },
                        TransformOp::Pluck {
                            field: "title".into(),
                        },
                    ],
                )
                .with_source("payload.items"),
            )
            .step(PipelineStep::transform("count", vec![TransformOp::Count]))
            .step(PipelineStep::condition(
                "enough",
                "count",
                Operator::Greater,
                json!(1),
            ));

        let payload = json!({"items": [
            {"title": "A", "score": 90},
            {"title": "B", "score": 20},
            {"title": "C", "score": 75}
        ]});
        let execution = engine.run(&pipeline, payload).await;
        assert!(execution.success());
        assert_eq!(execution.output("relevant"), Some(&json!(["A", "C"])));
        assert_eq!(execution.output("count"), Some(&json!(2)));
        assert_eq!(execution.result(), &json!(true));
    }

    #[tokio::test]
    async fn unknown_handler_is_a_critical_failure() {
        let engine = PipelineEngine::new(HandlerRegistry::new(), &config()).unwrap();
        let pipeline = Pipeline::new("p").step(PipelineStep::callback("x", "missing"));
        let execution = engine.run(&pipeline, json!({})).await;
        assert_eq!(execution.failed_step, Some(0));
        assert_eq!(execution.errors[0].attempts, 1);
    }

    #[tokio::test]
    async fn flaky_handler_recovers_on_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let registry = HandlerRegistry::new().with_fn("flaky", move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient");
            }
            Ok(json!("ok"))
        });
        let engine = PipelineEngine::new(registry, &config()).unwrap();
        let pipeline = Pipeline::new("p").step(PipelineStep::callback("flaky", "flaky"));

        let execution = engine.run(&pipeline, json!({})).await;
        assert!(execution.success());
        assert_eq!(execution.step_results[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn progress_reported_after_each_step() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let engine = PipelineEngine::new(doubling_registry(), &config())
            .unwrap()
            .with_progress(move |done, total| sink.lock().unwrap().push((done, total)));
        let pipeline = Pipeline::new("p")
            .step(PipelineStep::callback("a", "double"))
            .step(PipelineStep::delay("pause", 1))
            .step(PipelineStep::callback("b", "double"));

        let execution = engine.run(&pipeline, json!({"n": 1})).await;
        assert_eq!(execution.result(), &json!(4));
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let engine = PipelineEngine::new(doubling_registry(), &config()).unwrap();
        let pipeline = Pipeline::new("p").step(PipelineStep::callback("a", "double"));
        let token = CancelToken::new();
        token.cancel();
        let execution = PipelineExecution::new("p", 1, ExecutionStatus::Scheduled);
        let execution = engine
            .execute(&pipeline, json!({"n": 1}), execution, &token, None)
            .await;
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(execution.completed_steps, 0);
    }
}
