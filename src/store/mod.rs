//! Storage abstraction for candidate records, retry-queue entries and
//! pipeline executions.
//!
//! The core never assumes a storage technology. Hosts plug in a backend by
//! implementing [`ItemStore`]; [`memory::MemoryStore`] serves tests, the CLI
//! and single-process deployments.
//!
//! Implementations must be `Send + Sync`: the lifecycle, the retry queue and
//! the pipeline workers share one store across tasks.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::{CandidateRecord, Stage};
use crate::pipeline::{ExecutionStatus, PipelineExecution};
use crate::retry_queue::QueueEntry;

pub use memory::MemoryStore;

/// Persistence for records, queue entries and executions.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Fails when a record with the same id already exists.
    async fn insert_record(&self, record: &CandidateRecord) -> Result<()>;

    async fn get_record(&self, id: Uuid) -> Result<Option<CandidateRecord>>;

    /// Every record ever created for this canonical URL, oldest first.
    async fn find_by_url(&self, url: &str) -> Result<Vec<CandidateRecord>>;

    /// Replaces the stored record with the same id.
    async fn update_record(&self, record: &CandidateRecord) -> Result<()>;

    /// Records in `stage`, or all of them, oldest first.
    async fn list_records(&self, stage: Option<Stage>) -> Result<Vec<CandidateRecord>>;

    async fn insert_entry(&self, entry: &QueueEntry) -> Result<()>;

    async fn get_entry(&self, id: Uuid) -> Result<Option<QueueEntry>>;

    async fn update_entry(&self, entry: &QueueEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn remove_entry(&self, id: Uuid) -> Result<bool>;

    /// Entries for `stage` in enqueue order.
    async fn entries_for_stage(&self, stage: &str) -> Result<Vec<QueueEntry>>;

    async fn save_execution(&self, execution: &PipelineExecution) -> Result<()>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>>;

    /// Executions currently in `status`, oldest first.
    async fn executions_with_status(&self, status: ExecutionStatus)
    -> Result<Vec<PipelineExecution>>;
}
