use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::models::{Tags, METRIC_NAME_TAG};
use crate::query::controller::TransformController;
use crate::query::executor::ExecutionError;
use crate::query::operation::{OpNode, Params, TransformId, TransformOp};
use crate::storage::{Block, DataPoint, Series};

pub const COUNT_TYPE: &str = "count";

/// Counts the series holding a sample at each timestamp
#[derive(Debug, Clone, Copy, Default)]
pub struct CountOp;

impl Params for CountOp {
    fn op_type(&self) -> &'static str {
        COUNT_TYPE
    }
}

impl fmt::Display for CountOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {}", COUNT_TYPE)
    }
}

impl TransformOp for CountOp {
    fn node(&self, controller: Arc<TransformController>) -> Arc<dyn OpNode> {
        Arc::new(CountNode { controller })
    }
}

pub struct CountNode {
    controller: Arc<TransformController>,
}

impl OpNode for CountNode {
    fn process(&self, _from: &TransformId, block: &Block) -> Result<(), ExecutionError> {
        let mut counts: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
        for series in block.series() {
            for point in series.points() {
                *counts.entry(point.timestamp()).or_default() += 1;
            }
        }

        let points = counts
            .into_iter()
            .map(|(timestamp, count)| DataPoint::new(timestamp, count as f64))
            .collect();
        let tags = Tags::new().with(METRIC_NAME_TAG, COUNT_TYPE);
        let series = Series::with_points(COUNT_TYPE, tags, points);

        self.controller.process(&Block::new(vec![series]))
    }
}
