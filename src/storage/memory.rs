use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    check_interrupted, FetchOptions, FetchQuery, FetchResult, SearchResults, Series, Storage,
    StorageError, StorageType, WriteQuery,
};
use crate::models::Metric;

/// An in-memory storage backend keyed by series id
pub struct MemoryStorage {
    namespace: String,
    /// Series keyed by their tag id
    data: Arc<RwLock<HashMap<String, Series>>>,
    storage_type: StorageType,
}

impl MemoryStorage {
    /// Creates an empty local storage for the namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            data: Arc::new(RwLock::new(HashMap::new())),
            storage_type: StorageType::LocalDc,
        }
    }

    /// Sets the reported storage type
    pub fn with_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the number of series held
    pub async fn series_count(&self) -> usize {
        self.data.read().await.len()
    }

    /// Returns the matching series sorted by id
    async fn matching(&self, query: &FetchQuery) -> Vec<(String, Series)> {
        let data = self.data.read().await;
        let mut matched: Vec<(String, Series)> = data
            .iter()
            .filter(|(_, series)| query.matchers.matches(series.tags()))
            .map(|(id, series)| (id.clone(), series.slice(query.start, query.end)))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn fetch(
        &self,
        ctx: &CancellationToken,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult, StorageError> {
        check_interrupted(ctx, options)?;
        query.validate()?;

        let mut matched = self.matching(query).await;
        let has_next = options.limit > 0 && matched.len() > options.limit;
        if has_next {
            matched.truncate(options.limit);
        }

        check_interrupted(ctx, options)?;

        debug!(
            "Fetched from memory storage: namespace={}, query={}, series={}",
            self.namespace,
            query,
            matched.len()
        );

        Ok(FetchResult {
            series_list: matched.into_iter().map(|(_, series)| series).collect(),
            local_only: self.storage_type == StorageType::LocalDc,
            has_next,
        })
    }

    async fn fetch_tags(
        &self,
        ctx: &CancellationToken,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<SearchResults, StorageError> {
        check_interrupted(ctx, options)?;

        let mut matched = self.matching(query).await;
        if options.limit > 0 {
            matched.truncate(options.limit);
        }

        let metrics = matched
            .into_iter()
            .map(|(id, series)| Metric {
                namespace: self.namespace.clone(),
                id,
                tags: series.tags().clone(),
            })
            .collect();

        Ok(SearchResults { metrics })
    }

    async fn write(&self, ctx: &CancellationToken, query: &WriteQuery) -> Result<(), StorageError> {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        query.validate()?;

        let id = query.tags.id();
        let mut data = self.data.write().await;
        match data.get_mut(&id) {
            Some(series) => series.append(&query.datapoints)?,
            None => {
                let name = query.tags.name().unwrap_or(&id).to_string();
                let mut series = Series::new(name, query.tags.clone());
                series.append(&query.datapoints)?;
                data.insert(id.clone(), series);
            }
        }

        debug!(
            "Wrote to memory storage: namespace={}, series={}, points={}",
            self.namespace,
            id,
            query.datapoints.len()
        );

        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchType, Matcher, Matchers, Tags};
    use crate::storage::DataPoint;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn write_query(host: &str, points: &[(i64, f64)]) -> WriteQuery {
        WriteQuery {
            raw: String::new(),
            tags: Tags::new().with("__name__", "cpu").with("host", host),
            datapoints: points
                .iter()
                .map(|(t, v)| DataPoint::new(ts(*t), *v))
                .collect(),
        }
    }

    fn fetch_query(matchers: Vec<Matcher>, start: i64, end: i64) -> FetchQuery {
        FetchQuery {
            raw: String::new(),
            matchers: Matchers::new(matchers),
            start: ts(start),
            end: ts(end),
        }
    }

    #[tokio::test]
    async fn test_write_and_fetch() {
        let storage = MemoryStorage::new("default");
        let ctx = CancellationToken::new();
        storage
            .write(&ctx, &write_query("a", &[(10, 1.0), (20, 2.0), (30, 3.0)]))
            .await
            .unwrap();
        storage
            .write(&ctx, &write_query("b", &[(10, 5.0)]))
            .await
            .unwrap();

        let query = fetch_query(
            vec![Matcher::new(MatchType::Equal, "host", "a").unwrap()],
            15,
            30,
        );
        let result = storage
            .fetch(&ctx, &query, &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(result.series_list.len(), 1);
        assert!(result.local_only);
        let points = result.series_list[0].points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value(), 2.0);
        assert_eq!(points[1].value(), 3.0);
    }

    #[tokio::test]
    async fn test_fetch_limit() {
        let storage = MemoryStorage::new("default");
        let ctx = CancellationToken::new();
        for host in ["a", "b", "c"] {
            storage
                .write(&ctx, &write_query(host, &[(1, 1.0)]))
                .await
                .unwrap();
        }

        let options = FetchOptions {
            limit: 2,
            ..Default::default()
        };
        let result = storage
            .fetch(&ctx, &fetch_query(vec![], 0, 10), &options)
            .await
            .unwrap();

        assert_eq!(result.series_list.len(), 2);
        assert!(result.has_next);
    }

    #[tokio::test]
    async fn test_fetch_interrupted() {
        let storage = MemoryStorage::new("default");
        let options = FetchOptions::default();
        options.kill.cancel();

        let result = storage
            .fetch(&CancellationToken::new(), &fetch_query(vec![], 0, 10), &options)
            .await;
        assert!(matches!(result, Err(StorageError::QueryInterrupted)));
    }

    #[tokio::test]
    async fn test_non_increasing_write() {
        let storage = MemoryStorage::new("default");
        let ctx = CancellationToken::new();
        storage
            .write(&ctx, &write_query("a", &[(10, 1.0)]))
            .await
            .unwrap();

        let result = storage.write(&ctx, &write_query("a", &[(5, 1.0)])).await;
        assert!(matches!(result, Err(StorageError::Data(_))));
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_no_trace() {
        let storage = MemoryStorage::new("default");
        let ctx = CancellationToken::new();
        let all = fetch_query(vec![], 0, 100);

        let result = storage
            .write(&ctx, &write_query("a", &[(10, 1.0), (5, 2.0)]))
            .await;
        assert!(matches!(result, Err(StorageError::Data(_))));
        let result = storage
            .write(&ctx, &write_query("b", &[(10, f64::NAN)]))
            .await;
        assert!(matches!(result, Err(StorageError::Data(_))));
        assert_eq!(storage.series_count().await, 0);

        storage
            .write(&ctx, &write_query("a", &[(10, 1.0)]))
            .await
            .unwrap();
        let result = storage
            .write(&ctx, &write_query("a", &[(20, 2.0), (15, 3.0)]))
            .await;
        assert!(matches!(result, Err(StorageError::Data(_))));

        let fetched = storage
            .fetch(&ctx, &all, &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(storage.series_count().await, 1);
        assert_eq!(fetched.series_list[0].points().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_tags() {
        let storage = MemoryStorage::new("metrics").with_type(StorageType::RemoteDc);
        let ctx = CancellationToken::new();
        storage
            .write(&ctx, &write_query("a", &[(1, 1.0)]))
            .await
            .unwrap();

        let results = storage
            .fetch_tags(&ctx, &fetch_query(vec![], 0, 10), &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.metrics.len(), 1);
        assert_eq!(results.metrics[0].namespace, "metrics");
        assert_eq!(results.metrics[0].id, "__name__=cpu,host=a");
        assert_eq!(storage.storage_type(), StorageType::RemoteDc);
    }
}
