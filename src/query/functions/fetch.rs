use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{MatchType, Matcher, MatcherError, Matchers, METRIC_NAME_TAG};
use crate::query::controller::TransformController;
use crate::query::executor::ExecutionError;
use crate::query::operation::{Params, SourceNode, SourceOp};
use crate::storage::{check_interrupted, Block, FetchOptions, FetchQuery, Storage};

pub const FETCH_TYPE: &str = "fetch";

/// Gets series from storage over a window ending `offset` before now
#[derive(Debug, Clone)]
pub struct FetchOp {
    pub name: String,
    pub range: Duration,
    pub offset: Duration,
    pub matchers: Matchers,
}

impl FetchOp {
    /// Fetches the last five minutes of the named metric
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: Duration::minutes(5),
            offset: Duration::zero(),
            matchers: Matchers::default(),
        }
    }

    pub fn with_range(mut self, range: Duration) -> Self {
        self.range = range;
        self
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_matchers(mut self, matchers: Matchers) -> Self {
        self.matchers = matchers;
        self
    }

    /// The configured matchers plus one on the metric name, if set
    fn query_matchers(&self) -> Result<Matchers, MatcherError> {
        let mut matchers = Vec::new();
        if !self.name.is_empty() {
            matchers.push(Matcher::new(MatchType::Equal, METRIC_NAME_TAG, &self.name)?);
        }
        matchers.extend(self.matchers.iter().cloned());
        Ok(Matchers::new(matchers))
    }
}

impl Params for FetchOp {
    fn op_type(&self) -> &'static str {
        FETCH_TYPE
    }
}

impl fmt::Display for FetchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type: {}. name: {}, range: {}, offset: {}, matchers: {}",
            FETCH_TYPE, self.name, self.range, self.offset, self.matchers
        )
    }
}

impl SourceOp for FetchOp {
    fn node(&self, controller: Arc<TransformController>) -> Arc<dyn SourceNode> {
        Arc::new(FetchNode {
            op: self.clone(),
            controller,
        })
    }
}

pub struct FetchNode {
    op: FetchOp,
    controller: Arc<TransformController>,
}

impl FetchNode {
    fn query(&self) -> Result<FetchQuery, ExecutionError> {
        let end = Utc::now()
            .checked_sub_signed(self.op.offset)
            .ok_or_else(|| ExecutionError::InvalidTimeRange(format!("offset {}", self.op.offset)))?;
        let start = end
            .checked_sub_signed(self.op.range)
            .ok_or_else(|| ExecutionError::InvalidTimeRange(format!("range {}", self.op.range)))?;
        let matchers = self
            .op
            .query_matchers()
            .map_err(|err| ExecutionError::TransformFailed {
                id: self.controller.id().clone(),
                reason: err.to_string(),
            })?;

        Ok(FetchQuery {
            raw: self.op.to_string(),
            matchers,
            start,
            end,
        })
    }
}

#[async_trait]
impl SourceNode for FetchNode {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        storage: &dyn Storage,
        options: &FetchOptions,
    ) -> Result<(), ExecutionError> {
        check_interrupted(ctx, options)?;
        let query = self.query()?;
        let result = storage.fetch(ctx, &query, options).await?;

        debug!(
            "Fetch node {} got {} series (local_only={}, has_next={})",
            self.controller.id(),
            result.series_list.len(),
            result.local_only,
            result.has_next
        );
        self.controller.process(&Block::new(result.series_list))
    }
}
