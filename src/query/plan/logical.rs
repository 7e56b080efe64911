use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{PlanningError, PlanningResult, RESULT_ID_PREFIX};
use crate::metrics;
use crate::query::operation::{Edge, Transform, TransformId};

/// A transform together with its links inside the DAG
#[derive(Debug, Clone)]
pub struct LogicalStep {
    /// Steps whose output this step consumes
    pub parents: Vec<TransformId>,
    /// Steps consuming this step's output
    pub children: Vec<TransformId>,
    pub transform: Arc<Transform>,
}

impl LogicalStep {
    pub fn new(transform: Arc<Transform>) -> Self {
        Self {
            parents: Vec::new(),
            children: Vec::new(),
            transform,
        }
    }

    pub fn id(&self) -> &TransformId {
        self.transform.id()
    }
}

impl fmt::Display for LogicalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parents: {}, Children: {}, Transform: {}",
            join_ids(&self.parents),
            join_ids(&self.children),
            self.transform
        )
    }
}

/// The query DAG indexed by transform id.
///
/// `pipeline` keeps transform ids in the order they were supplied. Cloning a
/// plan copies the step links but shares the transforms themselves.
#[derive(Debug, Clone, Default)]
pub struct LogicalPlan {
    pub steps: HashMap<TransformId, LogicalStep>,
    pub pipeline: Vec<TransformId>,
}

impl LogicalPlan {
    /// Builds the DAG from transforms and the edges linking them
    pub fn generate(transforms: &[Arc<Transform>], edges: &[Edge]) -> PlanningResult<Self> {
        let mut plan = LogicalPlan {
            steps: HashMap::with_capacity(transforms.len()),
            pipeline: Vec::with_capacity(transforms.len()),
        };

        for transform in transforms {
            let id = transform.id();
            if id.as_str().starts_with(RESULT_ID_PREFIX) {
                return Err(PlanningError::ReservedTransformId(id.clone()));
            }
            if plan.steps.contains_key(id) {
                return Err(PlanningError::DuplicateTransform(id.clone()));
            }
            plan.steps
                .insert(id.clone(), LogicalStep::new(transform.clone()));
            plan.pipeline.push(id.clone());
        }

        for edge in edges {
            if !plan.steps.contains_key(&edge.parent_id) {
                return Err(PlanningError::ParentNotFound(edge.parent_id.clone()));
            }
            if !plan.steps.contains_key(&edge.child_id) {
                return Err(PlanningError::ChildNotFound(edge.child_id.clone()));
            }
            if let Some(parent) = plan.steps.get_mut(&edge.parent_id) {
                parent.children.push(edge.child_id.clone());
            }
            if let Some(child) = plan.steps.get_mut(&edge.child_id) {
                child.parents.push(edge.parent_id.clone());
            }
        }

        debug!(
            "Generated logical plan: steps={}, edges={}",
            plan.steps.len(),
            edges.len()
        );
        metrics::record_plan_built("logical", plan.steps.len());
        Ok(plan)
    }

    pub fn step(&self, id: &TransformId) -> Option<&LogicalStep> {
        self.steps.get(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self
            .pipeline
            .iter()
            .filter_map(|id| self.steps.get(id))
            .map(|step| format!("({})", step))
            .collect();
        write!(
            f,
            "Steps: [{}], Pipeline: [{}]",
            steps.join(", "),
            join_ids(&self.pipeline)
        )
    }
}

pub(crate) fn join_ids(ids: &[TransformId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
