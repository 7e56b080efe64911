use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::query::executor::ExecutionError;
use crate::query::operation::{OpNode, TransformId};
use crate::storage::Block;

/// Broadcasts the output of one node to every node consuming it.
///
/// Downstream nodes are registered while the execution state is built, after
/// which the controller is sealed and the list is fixed for execution.
pub struct TransformController {
    id: TransformId,
    pending: Mutex<Vec<Arc<dyn OpNode>>>,
    transforms: OnceLock<Vec<Arc<dyn OpNode>>>,
}

impl TransformController {
    pub fn new(id: TransformId) -> Self {
        Self {
            id,
            pending: Mutex::new(Vec::new()),
            transforms: OnceLock::new(),
        }
    }

    /// ID of the step whose output this controller carries
    pub fn id(&self) -> &TransformId {
        &self.id
    }

    /// Registers a downstream node
    pub fn add_transform(&self, node: Arc<dyn OpNode>) -> Result<(), ExecutionError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.transforms.get().is_some() {
            return Err(ExecutionError::ControllerSealed(self.id.clone()));
        }
        pending.push(node);
        Ok(())
    }

    /// Fixes the downstream list. Sealing twice is a no-op.
    pub fn seal(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.transforms.get().is_none() {
            let _ = self.transforms.set(std::mem::take(&mut *pending));
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.transforms.get().is_some()
    }

    pub fn downstream_count(&self) -> usize {
        match self.transforms.get() {
            Some(transforms) => transforms.len(),
            None => self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Hands `block` to every downstream node in registration order, stopping
    /// at the first failure
    pub fn process(&self, block: &Block) -> Result<(), ExecutionError> {
        let transforms = self
            .transforms
            .get()
            .ok_or_else(|| ExecutionError::ControllerNotSealed(self.id.clone()))?;
        for node in transforms {
            node.process(&self.id, block)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransformController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformController")
            .field("id", &self.id)
            .field("downstream", &self.downstream_count())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
