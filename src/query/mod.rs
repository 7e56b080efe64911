//! Query module for the coordinator
//! Handles query planning and execution.

pub mod controller;
pub mod executor;
pub mod functions;
pub mod operation;
pub mod plan;

pub use controller::TransformController;
pub use executor::{ExecutionError, ExecutionState, ExecutionStatus, SourceStep};
pub use operation::{Edge, Op, OpNode, Params, SourceNode, SourceOp, Transform, TransformId, TransformOp};
pub use plan::{LogicalPlan, LogicalStep, PhysicalPlan, PlanningError, ResultNode};
