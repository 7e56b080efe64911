use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    FetchOptions, FetchQuery, FetchResult, Query, SearchResults, Storage, StorageError,
    StorageType, WriteQuery,
};
use crate::execution::{execute_parallel_ordered, execute_parallel_unordered, Request};
use crate::metrics;

/// Decides whether a store takes part in a query
pub type StorageFilter = fn(&Query<'_>, &dyn Storage) -> bool;

/// Sends every query to every store
pub fn allow_all(_query: &Query<'_>, _store: &dyn Storage) -> bool {
    true
}

/// Sends queries only to stores in the local datacenter
pub fn local_only(_query: &Query<'_>, store: &dyn Storage) -> bool {
    store.storage_type() == StorageType::LocalDc
}

/// Sends queries only to stores outside the local datacenter
pub fn remote_only(_query: &Query<'_>, store: &dyn Storage) -> bool {
    store.storage_type() != StorageType::LocalDc
}

/// A storage that fans every query out to several backing stores.
///
/// Fetches are all-or-nothing: any failing store fails the fetch. Writes are
/// attempted on every store and the first failure is reported after all of
/// them have finished, so callers must expect partial success.
pub struct FanoutStorage {
    stores: Vec<Arc<dyn Storage>>,
    filter: StorageFilter,
}

impl FanoutStorage {
    pub fn new(stores: Vec<Arc<dyn Storage>>, filter: StorageFilter) -> Self {
        Self { stores, filter }
    }

    fn filter_stores(&self, query: Query<'_>) -> Vec<Arc<dyn Storage>> {
        self.stores
            .iter()
            .filter(|store| (self.filter)(&query, store.as_ref()))
            .cloned()
            .collect()
    }
}

struct FetchRequest {
    store: Arc<dyn Storage>,
    query: Arc<FetchQuery>,
    options: FetchOptions,
}

#[async_trait]
impl Request for FetchRequest {
    type Output = FetchResult;
    type Error = StorageError;

    async fn process(&self, ctx: &CancellationToken) -> Result<FetchResult, StorageError> {
        self.store.fetch(ctx, &self.query, &self.options).await
    }
}

struct FetchTagsRequest {
    store: Arc<dyn Storage>,
    query: Arc<FetchQuery>,
    options: FetchOptions,
}

#[async_trait]
impl Request for FetchTagsRequest {
    type Output = SearchResults;
    type Error = StorageError;

    async fn process(&self, ctx: &CancellationToken) -> Result<SearchResults, StorageError> {
        self.store.fetch_tags(ctx, &self.query, &self.options).await
    }
}

struct WriteRequest {
    store: Arc<dyn Storage>,
    query: Arc<WriteQuery>,
}

#[async_trait]
impl Request for WriteRequest {
    type Output = ();
    type Error = StorageError;

    async fn process(&self, ctx: &CancellationToken) -> Result<(), StorageError> {
        self.store.write(ctx, &self.query).await
    }
}

#[async_trait]
impl Storage for FanoutStorage {
    async fn fetch(
        &self,
        ctx: &CancellationToken,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult, StorageError> {
        let stores = self.filter_stores(Query::Fetch(query));
        let shared = Arc::new(query.clone());
        let requests = stores
            .iter()
            .map(|store| FetchRequest {
                store: store.clone(),
                query: shared.clone(),
                options: options.clone(),
            })
            .collect();

        let responses = execute_parallel_ordered(ctx, requests).await?;

        let mut result = FetchResult {
            local_only: true,
            ..Default::default()
        };
        for (store, response) in stores.iter().zip(responses) {
            let fetched = response.result?;
            if store.storage_type() != StorageType::LocalDc {
                result.local_only = false;
            }
            result.has_next |= fetched.has_next;
            result.series_list.extend(fetched.series_list);
        }

        debug!(
            "Fanout fetch complete: stores={}, series={}, local_only={}",
            stores.len(),
            result.series_list.len(),
            result.local_only
        );
        Ok(result)
    }

    async fn fetch_tags(
        &self,
        ctx: &CancellationToken,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<SearchResults, StorageError> {
        let stores = self.filter_stores(Query::Fetch(query));
        let total = stores.len();
        let shared = Arc::new(query.clone());
        let requests = stores
            .into_iter()
            .map(|store| FetchTagsRequest {
                store,
                query: shared.clone(),
                options: options.clone(),
            })
            .collect();

        let mut responses = Box::pin(execute_parallel_unordered(ctx, requests));
        let mut results = SearchResults::default();
        let mut received = 0;
        while let Some(response) = responses.next().await {
            received += 1;
            results.metrics.extend(response.result?.metrics);
        }

        if received < total {
            return Err(StorageError::Cancelled);
        }
        Ok(results)
    }

    async fn write(&self, ctx: &CancellationToken, query: &WriteQuery) -> Result<(), StorageError> {
        let stores = self.filter_stores(Query::Write(query));
        let total = stores.len();
        let shared = Arc::new(query.clone());
        let requests = stores
            .into_iter()
            .map(|store| WriteRequest {
                store,
                query: shared.clone(),
            })
            .collect();

        let mut responses = Box::pin(execute_parallel_unordered(ctx, requests));
        let mut first_error = None;
        let mut received = 0;
        while let Some(response) = responses.next().await {
            received += 1;
            if let Err(err) = response.result {
                warn!(store = response.index, error = %err, "Fanout write failed on store");
                metrics::record_fanout_write_failure();
                first_error.get_or_insert(StorageError::from(err));
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if received < total {
            return Err(StorageError::Cancelled);
        }
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::MultiDc
    }
}
