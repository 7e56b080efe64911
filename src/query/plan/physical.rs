use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::logical::{join_ids, LogicalPlan, LogicalStep};
use super::{PlanningError, PlanningResult, ResultOp, RESULT_ID_PREFIX};
use crate::metrics;
use crate::query::operation::{Op, Transform, TransformId};

/// A logical plan lowered for execution.
///
/// `result_step` consumes the plan's single leaf. It is not part of `steps` or
/// `pipeline` and is only reachable through the field itself.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub steps: HashMap<TransformId, LogicalStep>,
    pub pipeline: Vec<TransformId>,
    pub result_step: LogicalStep,
}

impl PhysicalPlan {
    /// Lowers `lp` by appending the result step after its leaf.
    ///
    /// The logical plan is left untouched.
    pub fn generate(lp: &LogicalPlan) -> PlanningResult<Self> {
        let cloned = lp.clone();
        let leaf = find_leaf(&cloned.steps, &cloned.pipeline)?.id().clone();

        // Ids carrying the prefix are rejected at logical planning time, so
        // the result id never collides with a caller's transform.
        let result_id = TransformId::new(format!(
            "{}_{}",
            RESULT_ID_PREFIX,
            cloned.steps.len() + 1
        ));
        let transform = Arc::new(Transform::new(result_id, Op::transform(ResultOp)));
        let mut result_step = LogicalStep::new(transform);
        result_step.parents.push(leaf);

        debug!(
            "Generated physical plan: steps={}, result={}, leaf={}",
            cloned.steps.len(),
            result_step.id(),
            join_ids(&result_step.parents)
        );
        metrics::record_plan_built("physical", cloned.steps.len() + 1);

        Ok(PhysicalPlan {
            steps: cloned.steps,
            pipeline: cloned.pipeline,
            result_step,
        })
    }

    /// Looks up a step, including the result step
    pub fn step(&self, id: &TransformId) -> Option<&LogicalStep> {
        if self.result_step.id() == id {
            return Some(&self.result_step);
        }
        self.steps.get(id)
    }

    /// The single childless step of the lowered plan
    pub fn leaf_node(&self) -> PlanningResult<&LogicalStep> {
        find_leaf(&self.steps, &self.pipeline)
    }

    pub fn result_step(&self) -> &LogicalStep {
        &self.result_step
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self
            .pipeline
            .iter()
            .filter_map(|id| self.steps.get(id))
            .map(|step| format!("({})", step))
            .collect();
        write!(
            f,
            "Steps: [{}], Pipeline: [{}], Result: ({})",
            steps.join(", "),
            join_ids(&self.pipeline),
            self.result_step
        )
    }
}

/// Scans the pipeline in insertion order for the unique step without children
fn find_leaf<'a>(
    steps: &'a HashMap<TransformId, LogicalStep>,
    pipeline: &[TransformId],
) -> PlanningResult<&'a LogicalStep> {
    let mut leaf: Option<&LogicalStep> = None;
    for id in pipeline {
        let step = steps
            .get(id)
            .ok_or_else(|| PlanningError::TransformNotFound(id.clone()))?;
        if !step.children.is_empty() {
            continue;
        }
        if let Some(first) = leaf {
            return Err(PlanningError::MultipleLeafNodes {
                first: first.id().clone(),
                second: step.id().clone(),
            });
        }
        leaf = Some(step);
    }
    leaf.ok_or(PlanningError::NoLeafNode)
}
