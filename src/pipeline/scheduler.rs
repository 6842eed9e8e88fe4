//! In-process [`RemoteScheduler`]: synchronous runs execute inline,
//! background runs are queued to a fixed pool of worker tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::PipelineEngine;
use super::execution::{CancelToken, ExecutionStatus, PipelineExecution};
use super::step::Pipeline;
use crate::adapters::{
    Action, AllowAll, CapabilityCheck, RemoteScheduler, StatusReport, TriggerOptions,
    TriggerReceipt, ensure_allowed,
};
use crate::error::{CuratorError, Result};
use crate::store::ItemStore;

const QUEUE_CAPACITY: usize = 256;

/// A queued run. Definition and payload live on the stored execution.
struct Job {
    id: Uuid,
    cancel: CancelToken,
}

#[derive(Default)]
struct Live {
    // Cancel flags of queued and running executions.
    cancels: HashMap<Uuid, CancelToken>,
    // Last (done, total) reported by a running execution.
    progress: HashMap<Uuid, (usize, usize)>,
}

struct Shared {
    engine: PipelineEngine,
    pipeline: Pipeline,
    store: Arc<dyn ItemStore>,
    live: Mutex<Live>,
}

impl Shared {
    fn live(&self) -> std::sync::MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, id: Uuid, cancel: CancelToken) {
        self.live().cancels.insert(id, cancel);
    }

    fn is_tracked(&self, id: Uuid) -> bool {
        self.live().cancels.contains_key(&id)
    }

    fn untrack(&self, id: Uuid) {
        let mut live = self.live();
        live.cancels.remove(&id);
        live.progress.remove(&id);
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        execution: PipelineExecution,
        cancel: &CancelToken,
    ) -> Result<PipelineExecution> {
        let id = execution.id;
        let payload = execution.payload.clone();
        let on_step = |done: usize, total: usize| {
            self.live().progress.insert(id, (done, total));
        };
        let finished = self
            .engine
            .execute(
                pipeline,
                payload,
                execution,
                cancel,
                Some(&on_step as &(dyn Fn(usize, usize) + Send + Sync)),
            )
            .await;
        let saved = self.store.save_execution(&finished).await;
        self.untrack(id);
        saved.map(|()| finished)
    }

    /// Loads a queued execution, or `None` when it should not run.
    async fn claim(&self, id: Uuid) -> Option<PipelineExecution> {
        match self.store.get_execution(id).await {
            Ok(Some(execution)) if execution.status == ExecutionStatus::Scheduled => Some(execution),
            Ok(Some(execution)) => {
                debug!(execution = %id, status = %execution.status, "queued execution no longer scheduled");
                None
            }
            Ok(None) => {
                warn!(execution = %id, "queued execution missing from store");
                None
            }
            Err(e) => {
                error!(execution = %id, "failed to load queued execution: {e}");
                None
            }
        }
    }
}

/// Runs one pipeline on behalf of a single actor.
///
/// Background triggers persist a `Scheduled` execution carrying the step
/// definitions and payload before anything is queued. Workers load the run
/// back from the store, so [`PipelineRunner::recover`] can re-queue work a
/// previous process left behind.
pub struct PipelineRunner {
    shared: Arc<Shared>,
    // Capability gate for trigger and cancel.
    capability: Arc<dyn CapabilityCheck>,
    // Identity passed to the capability gate.
    actor: String,
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl PipelineRunner {
    /// Spawns `workers` background tasks. Must be called inside a Tokio runtime.
    pub fn start(
        engine: PipelineEngine,
        pipeline: Pipeline,
        store: Arc<dyn ItemStore>,
        workers: usize,
    ) -> Result<Self> {
        pipeline.validate()?;
        let shared = Arc::new(Shared {
            engine,
            pipeline,
            store,
            live: Mutex::new(Live::default()),
        });

        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = (0..workers.max(1))
            .map(|worker| {
                let shared = Arc::clone(&shared);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move { work(worker, shared, receiver).await })
            })
            .collect();

        Ok(Self {
            shared,
            capability: Arc::new(AllowAll),
            actor: "system".to_string(),
            sender,
            workers,
        })
    }

    /// Identity and permission check applied to trigger and cancel.
    pub fn acting_as(
        mut self,
        actor: impl Into<String>,
        capability: Arc<dyn CapabilityCheck>,
    ) -> Self {
        self.actor = actor.into();
        self.capability = capability;
        self
    }

    /// Full record of a finished or queued execution.
    pub async fn execution(&self, id: Uuid) -> Result<Option<PipelineExecution>> {
        self.shared.store.get_execution(id).await
    }

    /// Re-queues this pipeline's `Scheduled` executions found in the store,
    /// typically after a restart. Returns how many were queued.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self
            .shared
            .store
            .executions_with_status(ExecutionStatus::Scheduled)
            .await?;
        let mut queued = 0;
        for execution in pending {
            if execution.pipeline != self.shared.pipeline.name || self.shared.is_tracked(execution.id) {
                continue;
            }
            self.enqueue(execution.id, CancelToken::new()).await?;
            queued += 1;
        }
        if queued > 0 {
            info!(pipeline = %self.shared.pipeline.name, queued, "recovered scheduled executions");
        }
        Ok(queued)
    }

    /// Stops accepting work and waits for queued runs to drain.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("pipeline worker panicked: {e}");
            }
        }
    }

    async fn enqueue(&self, id: Uuid, cancel: CancelToken) -> Result<()> {
        self.shared.track(id, cancel.clone());
        if self.sender.send(Job { id, cancel }).await.is_err() {
            self.shared.untrack(id);
            return Err(CuratorError::Store("pipeline workers have stopped".into()));
        }
        Ok(())
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

async fn work(worker: usize, shared: Arc<Shared>, receiver: SharedReceiver) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(Job { id, cancel }) = job else {
            debug!(worker, "pipeline worker stopping");
            return;
        };

        if cancel.is_cancelled() {
            debug!(worker, execution = %id, "skipping cancelled execution");
            shared.untrack(id);
            continue;
        }
        let Some(mut execution) = shared.claim(id).await else {
            shared.untrack(id);
            continue;
        };

        let pipeline = match execution.definition.clone() {
            Some(definition) => definition,
            None => shared.pipeline.clone(),
        };
        execution.status = ExecutionStatus::Running;
        if let Err(e) = shared.store.save_execution(&execution).await {
            error!(execution = %id, "failed to mark execution running: {e}");
        }
        if let Err(e) = shared.run(&pipeline, execution, &cancel).await {
            error!(worker, "failed to store finished execution: {e}");
        }
    }
}

#[async_trait]
impl RemoteScheduler for PipelineRunner {
    async fn trigger(&self, payload: Value, options: TriggerOptions) -> Result<TriggerReceipt> {
        ensure_allowed(self.capability.as_ref(), &self.actor, Action::Trigger)?;
        let mut execution = PipelineExecution::scheduled(&self.shared.pipeline, payload);
        let id = execution.id;

        if !options.run_async {
            let cancel = CancelToken::new();
            execution.status = ExecutionStatus::Running;
            self.shared.track(id, cancel.clone());
            let finished = self
                .shared
                .run(&self.shared.pipeline, execution, &cancel)
                .await?;
            return Ok(TriggerReceipt {
                execution_id: id,
                status: finished.status,
            });
        }

        self.shared.store.save_execution(&execution).await?;
        self.enqueue(id, CancelToken::new()).await?;

        info!(execution = %id, actor = %self.actor, "pipeline scheduled");
        Ok(TriggerReceipt {
            execution_id: id,
            status: ExecutionStatus::Scheduled,
        })
    }

    async fn get_status(&self, execution_id: Uuid) -> Result<StatusReport> {
        let progress = self.shared.live().progress.get(&execution_id).copied();
        if let Some((done, total)) = progress {
            return Ok(StatusReport {
                status: ExecutionStatus::Running,
                current_step: done,
                total_steps: total,
            });
        }

        let execution = self
            .shared
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("execution {execution_id}")))?;
        Ok(StatusReport {
            status: execution.status,
            current_step: execution.completed_steps,
            total_steps: execution.total_steps,
        })
    }

    async fn cancel(&self, execution_id: Uuid) -> Result<bool> {
        ensure_allowed(self.capability.as_ref(), &self.actor, Action::Cancel)?;
        let token = self.shared.live().cancels.get(&execution_id).cloned();
        let Some(token) = token else {
            return Ok(false);
        };
        token.cancel();

        // Queued runs never reach the engine; record the outcome here.
        if let Some(mut execution) = self.shared.store.get_execution(execution_id).await?
            && execution.status == ExecutionStatus::Scheduled
        {
            execution.status = ExecutionStatus::Cancelled;
            execution.finished_at = Some(chrono::Utc::now());
            self.shared.store.save_execution(&execution).await?;
        }
        info!(execution = %execution_id, actor = %self.actor, "pipeline cancellation requested");
        Ok(true)
    }
}
