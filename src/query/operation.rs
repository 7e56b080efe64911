//! Operations, transforms and edges making up a query DAG.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::query::controller::TransformController;
use crate::query::executor::ExecutionError;
use crate::storage::{Block, FetchOptions, Storage};

/// Uniquely identifies a transform across a whole plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformId(String);

impl TransformId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransformId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TransformId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Immutable, stateless description of a unit of query work
pub trait Params: fmt::Display + fmt::Debug + Send + Sync {
    /// Human-readable type tag
    fn op_type(&self) -> &'static str;
}

/// An operation that produces data independently of any other step
pub trait SourceOp: Params {
    /// Creates the runtime node, which pushes what it produces into `controller`
    fn node(&self, controller: Arc<TransformController>) -> Arc<dyn SourceNode>;
}

/// An operation that consumes data pushed by its parents
pub trait TransformOp: Params {
    /// Creates the runtime node, which pushes what it produces into `controller`
    fn node(&self, controller: Arc<TransformController>) -> Arc<dyn OpNode>;
}

/// An operation tagged with its role in the plan.
///
/// The role is fixed when the operation is declared, so plan construction can
/// tell sources apart without building anything.
#[derive(Debug, Clone)]
pub enum Op {
    Source(Arc<dyn SourceOp>),
    Transform(Arc<dyn TransformOp>),
}

impl Op {
    pub fn source(op: impl SourceOp + 'static) -> Self {
        Op::Source(Arc::new(op))
    }

    pub fn transform(op: impl TransformOp + 'static) -> Self {
        Op::Transform(Arc::new(op))
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Op::Source(_))
    }

    pub fn op_type(&self) -> &'static str {
        match self {
            Op::Source(op) => op.op_type(),
            Op::Transform(op) => op.op_type(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Source(op) => write!(f, "{}", op),
            Op::Transform(op) => write!(f, "{}", op),
        }
    }
}

/// Runtime node receiving blocks from its parents
pub trait OpNode: Send + Sync {
    /// Consumes a block produced by the step `from`
    fn process(&self, from: &TransformId, block: &Block) -> Result<(), ExecutionError>;
}

/// Runtime node for a source step
#[async_trait]
pub trait SourceNode: Send + Sync {
    /// Produces data and pushes it downstream
    async fn execute(
        &self,
        ctx: &CancellationToken,
        storage: &dyn Storage,
        options: &FetchOptions,
    ) -> Result<(), ExecutionError>;
}

/// A node in the query DAG: an operation and its identity
#[derive(Debug, Clone)]
pub struct Transform {
    id: TransformId,
    op: Op,
}

impl Transform {
    pub fn new(id: impl Into<TransformId>, op: Op) -> Self {
        Self { id: id.into(), op }
    }

    /// Creates a transform whose id is the stringified sequence number
    pub fn from_operation(op: Op, next_id: usize) -> Self {
        Self::new(next_id.to_string(), op)
    }

    pub fn id(&self) -> &TransformId {
        &self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}, Op: {}", self.id, self.op)
    }
}

/// Transforms shared between plans
pub type Transforms = Vec<Arc<Transform>>;

/// A directed dependency from a parent step to a child step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub parent_id: TransformId,
    pub child_id: TransformId,
}

impl Edge {
    pub fn new(parent_id: impl Into<TransformId>, child_id: impl Into<TransformId>) -> Self {
        Self {
            parent_id: parent_id.into(),
            child_id: child_id.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parent: {}, child: {}", self.parent_id, self.child_id)
    }
}

pub type Edges = Vec<Edge>;
