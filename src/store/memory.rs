//! In-memory [`ItemStore`] for tests, the CLI and single-process hosts.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Locks are never held
//! across an await point.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::ItemStore;
use crate::error::{CuratorError, Result};
use crate::lifecycle::{CandidateRecord, Stage};
use crate::pipeline::{ExecutionStatus, PipelineExecution};
use crate::retry_queue::QueueEntry;

/// Process-local [`ItemStore`]; everything is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, CandidateRecord>>,
    // Vec keeps enqueue order.
    entries: RwLock<Vec<QueueEntry>>,
    executions: RwLock<HashMap<Uuid, PipelineExecution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| CuratorError::Store("memory store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| CuratorError::Store("memory store lock poisoned".into()))
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_record(&self, record: &CandidateRecord) -> Result<()> {
        let mut records = write(&self.records)?;
        if records.contains_key(&record.id) {
            return Err(CuratorError::Store(format!("record {} already exists", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CandidateRecord>> {
        Ok(read(&self.records)?.get(&id).cloned())
    }

    async fn find_by_url(&self, url: &str) -> Result<Vec<CandidateRecord>> {
        let mut found: Vec<CandidateRecord> = read(&self.records)?
            .values()
            .filter(|r| r.item.url == url)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn update_record(&self, record: &CandidateRecord) -> Result<()> {
        let mut records = write(&self.records)?;
        match records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(CuratorError::NotFound(format!("record {}", record.id))),
        }
    }

    async fn list_records(&self, stage: Option<Stage>) -> Result<Vec<CandidateRecord>> {
        let mut found: Vec<CandidateRecord> = read(&self.records)?
            .values()
            .filter(|r| stage.is_none_or(|s| r.stage == s))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> Result<()> {
        write(&self.entries)?.push(entry.clone());
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<QueueEntry>> {
        Ok(read(&self.entries)?.iter().find(|e| e.id == id).cloned())
    }

    async fn update_entry(&self, entry: &QueueEntry) -> Result<()> {
        let mut entries = write(&self.entries)?;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => {
                *slot = entry.clone();
                Ok(())
            }
            None => Err(CuratorError::NotFound(format!("queue entry {}", entry.id))),
        }
    }

    async fn remove_entry(&self, id: Uuid) -> Result<bool> {
        let mut entries = write(&self.entries)?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }

    async fn entries_for_stage(&self, stage: &str) -> Result<Vec<QueueEntry>> {
        Ok(read(&self.entries)?
            .iter()
            .filter(|e| e.stage == stage)
            .cloned()
            .collect())
    }

    async fn save_execution(&self, execution: &PipelineExecution) -> Result<()> {
        write(&self.executions)?.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>> {
        Ok(read(&self.executions)?.get(&id).cloned())
    }

    async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<PipelineExecution>> {
        let mut found: Vec<PipelineExecution> = read(&self.executions)?
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.started_at);
        Ok(found)
    }
}
