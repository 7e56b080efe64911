//! Storage module for the coordinator
//!
//! Defines the boundary the query engine fetches from and writes to, plus the
//! multi-backend fan-out storage and an in-memory backend.

pub mod data;
pub mod fanout;
pub mod memory;

pub use data::{Block, DataError, DataPoint, Series};
pub use fanout::{FanoutStorage, StorageFilter};
pub use memory::MemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::execution::ParallelError;
use crate::models::{Matchers, Metric, Tags};

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query interrupted")]
    QueryInterrupted,
    #[error("Storage request cancelled")]
    Cancelled,
    #[error("Invalid fetch query: {0}")]
    InvalidFetch(String),
    #[error("Invalid write query: {0}")]
    InvalidWrite(String),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage task failed: {0}")]
    TaskFailed(String),
}

impl From<ParallelError<StorageError>> for StorageError {
    fn from(err: ParallelError<StorageError>) -> Self {
        match err {
            ParallelError::Request(err) => err,
            ParallelError::Cancelled => StorageError::Cancelled,
            ParallelError::TaskFailed(msg) => StorageError::TaskFailed(msg),
        }
    }
}

/// Where a storage lives relative to this coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Storage in the local datacenter
    LocalDc,
    /// Storage in a remote datacenter
    RemoteDc,
    /// Storage aggregating several datacenters
    MultiDc,
}

/// Selects series over an inclusive time range
#[derive(Debug, Clone)]
pub struct FetchQuery {
    pub raw: String,
    pub matchers: Matchers,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchQuery {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.start > self.end {
            return Err(StorageError::InvalidFetch(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FetchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "{} [{}, {}]", self.matchers, self.start, self.end)
        } else {
            f.write_str(&self.raw)
        }
    }
}

/// Samples for a single series to be written
#[derive(Debug, Clone)]
pub struct WriteQuery {
    pub raw: String,
    pub tags: Tags,
    pub datapoints: Vec<DataPoint>,
}

impl WriteQuery {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.tags.is_empty() {
            return Err(StorageError::InvalidWrite("write has no tags".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for WriteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "{} ({} points)", self.tags, self.datapoints.len())
        } else {
            f.write_str(&self.raw)
        }
    }
}

/// Either kind of query, as seen by store filters
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    Fetch(&'a FetchQuery),
    Write(&'a WriteQuery),
}

/// Per-fetch options
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Maximum number of series returned, 0 for no limit
    pub limit: usize,
    /// Fired to interrupt the query
    pub kill: CancellationToken,
}

/// The result of a fetch, possibly aggregated across several storages
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub series_list: Vec<Series>,
    pub local_only: bool,
    pub has_next: bool,
}

/// The result of a tag search
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub metrics: Vec<Metric>,
}

/// Returns an error if the request was cancelled or the query interrupted.
///
/// Storages call this before and after blocking work.
pub fn check_interrupted(
    ctx: &CancellationToken,
    options: &FetchOptions,
) -> Result<(), StorageError> {
    if ctx.is_cancelled() {
        return Err(StorageError::Cancelled);
    }
    if options.kill.is_cancelled() {
        return Err(StorageError::QueryInterrupted);
    }
    Ok(())
}

/// Reading and writing against a time series database
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetches series matching the query
    async fn fetch(
        &self,
        ctx: &CancellationToken,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult, StorageError>;

    /// Lists the series matching the query without their samples
    async fn fetch_tags(
        &self,
        ctx: &CancellationToken,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<SearchResults, StorageError>;

    /// Writes samples for one series
    async fn write(&self, ctx: &CancellationToken, query: &WriteQuery) -> Result<(), StorageError>;

    fn storage_type(&self) -> StorageType;
}
