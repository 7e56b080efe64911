use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::query::controller::TransformController;
use crate::query::executor::ExecutionError;
use crate::query::operation::{OpNode, Params, TransformId, TransformOp};
use crate::storage::Block;

/// Prefix reserved for the synthesized result step id
pub const RESULT_ID_PREFIX: &str = "__result";

pub const RESULT_TYPE: &str = "result";

/// The sink appended after a plan's leaf.
///
/// The execution state builds the result node itself rather than through
/// `node`, so it keeps the concrete `ResultNode` and can read its blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultOp;

impl Params for ResultOp {
    fn op_type(&self) -> &'static str {
        RESULT_TYPE
    }
}

impl fmt::Display for ResultOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {}", RESULT_TYPE)
    }
}

impl TransformOp for ResultOp {
    fn node(&self, _controller: Arc<TransformController>) -> Arc<dyn OpNode> {
        Arc::new(ResultNode::new())
    }
}

/// Collects every block reaching the end of the pipeline
#[derive(Debug, Default)]
pub struct ResultNode {
    blocks: Mutex<Vec<Block>>,
}

impl ResultNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks delivered so far, in arrival order
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drains the delivered blocks
    pub fn take_blocks(&self) -> Vec<Block> {
        std::mem::take(&mut *self.blocks.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OpNode for ResultNode {
    fn process(&self, _from: &TransformId, block: &Block) -> Result<(), ExecutionError> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(block.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tags;
    use crate::storage::Series;

    #[test]
    fn test_collects_blocks() {
        let node = ResultNode::new();
        let block = Block::new(vec![Series::new("cpu", Tags::new())]);
        node.process(&TransformId::new("1"), &block).unwrap();
        node.process(&TransformId::new("1"), &Block::default()).unwrap();

        let blocks = node.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], block);

        assert_eq!(node.take_blocks().len(), 2);
        assert!(node.blocks().is_empty());
    }

    #[test]
    fn test_result_op() {
        let op = ResultOp;
        assert_eq!(op.op_type(), "result");
        assert_eq!(op.to_string(), "type: result");

        let controller = Arc::new(TransformController::new(TransformId::new("__result_1")));
        let node = op.node(controller);
        assert!(node
            .process(&TransformId::new("1"), &Block::default())
            .is_ok());
    }
}
