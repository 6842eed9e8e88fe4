//! Content curation core: pluggable scoring with a keyword fallback, a
//! candidate lifecycle with audited transitions, a retry queue for failed
//! scoring and a step-pipeline engine.

pub mod adapters;
pub mod config;
pub mod curator;
pub mod error;
pub mod lifecycle;
mod locks;
pub mod model;
pub mod pipeline;
pub mod retry_queue;
pub mod scoring;
pub mod store;

pub use curator::{BatchReport, Curator, ReprocessReport, ScoreItemsHandler};
pub use error::{CuratorError, Result};
