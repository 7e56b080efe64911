//! Query planning
//!
//! A query arrives as a flat list of transforms plus edges. The logical plan
//! indexes them into a DAG, and the physical plan adds the single sink every
//! result flows into.

pub mod logical;
pub mod physical;
pub mod result;

pub use logical::{LogicalPlan, LogicalStep};
pub use physical::PhysicalPlan;
pub use result::{ResultNode, ResultOp, RESULT_ID_PREFIX};

use thiserror::Error;

use crate::query::operation::TransformId;

/// Error type for planning operations
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Invalid DAG found, parent {0} not found")]
    ParentNotFound(TransformId),
    #[error("Invalid DAG found, child {0} not found")]
    ChildNotFound(TransformId),
    #[error("Duplicate transform id: {0}")]
    DuplicateTransform(TransformId),
    #[error("Transform id {0} is reserved for the result step")]
    ReservedTransformId(TransformId),
    #[error("Transform not found: {0}")]
    TransformNotFound(TransformId),
    #[error("No leaf node found in plan")]
    NoLeafNode,
    #[error("Multiple leaf nodes found: {first} and {second}")]
    MultipleLeafNodes {
        first: TransformId,
        second: TransformId,
    },
}

/// Result type for planning operations
pub type PlanningResult<T> = Result<T, PlanningError>;
