use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::execution::{execute_parallel, ParallelError, Request};
use crate::metrics;
use crate::query::controller::TransformController;
use crate::query::operation::{Op, OpNode, SourceNode, TransformId};
use crate::query::plan::{LogicalStep, PhysicalPlan, ResultNode};
use crate::storage::{FetchOptions, Storage, StorageError};

/// Error type for execution operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Empty sources for the execution state")]
    EmptySources,
    #[error("Incorrect parent reference, parent: {parent}, node: {child}")]
    MissingParent {
        parent: TransformId,
        child: TransformId,
    },
    #[error("Cycle detected at transform {0}")]
    CycleDetected(TransformId),
    #[error("Result step must have exactly one parent, found {0}")]
    InvalidResultStep(usize),
    #[error("Controller for {0} is sealed")]
    ControllerSealed(TransformId),
    #[error("Controller for {0} has not been sealed")]
    ControllerNotSealed(TransformId),
    #[error("Transform {id} failed: {reason}")]
    TransformFailed { id: TransformId, reason: String },
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Query cancelled")]
    Cancelled,
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
    #[error("Execution task failed: {0}")]
    TaskFailed(String),
    #[error("Execution state already used, status: {0:?}")]
    AlreadyExecuted(ExecutionStatus),
}

impl ExecutionError {
    /// True if the query's kill signal stopped it
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ExecutionError::Storage(StorageError::QueryInterrupted))
    }

    /// True if the caller's context stopped it
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ExecutionError::Cancelled | ExecutionError::Storage(StorageError::Cancelled)
        )
    }
}

impl From<ParallelError<ExecutionError>> for ExecutionError {
    fn from(err: ParallelError<ExecutionError>) -> Self {
        match err {
            ParallelError::Request(err) => err,
            ParallelError::Cancelled => ExecutionError::Cancelled,
            ParallelError::TaskFailed(msg) => ExecutionError::TaskFailed(msg),
        }
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Built,
    Executing,
    Succeeded,
    Failed,
}

/// A source node and the step it was built from
#[derive(Clone)]
pub struct SourceStep {
    pub id: TransformId,
    pub node: Arc<dyn SourceNode>,
}

/// The runtime pipeline for one query.
///
/// Built from a physical plan by walking back from the result step, so only
/// steps feeding the result are instantiated. A state executes at most once.
pub struct ExecutionState {
    query_id: Uuid,
    plan: Arc<PhysicalPlan>,
    sources: Vec<SourceStep>,
    controllers: HashMap<TransformId, Arc<TransformController>>,
    result_node: Arc<ResultNode>,
    storage: Arc<dyn Storage>,
    config: ExecutionConfig,
    kill: CancellationToken,
    status: Mutex<ExecutionStatus>,
}

impl ExecutionState {
    /// Builds the runtime pipeline with the default config
    pub fn generate(plan: Arc<PhysicalPlan>, storage: Arc<dyn Storage>) -> ExecutionResult<Self> {
        Self::generate_with_config(plan, storage, ExecutionConfig::default())
    }

    /// Builds the runtime pipeline.
    ///
    /// Each step reachable from the result gets one node and one controller,
    /// even when several children share it. Every controller is sealed once
    /// the walk finishes.
    pub fn generate_with_config(
        plan: Arc<PhysicalPlan>,
        storage: Arc<dyn Storage>,
        config: ExecutionConfig,
    ) -> ExecutionResult<Self> {
        let result_step = &plan.result_step;
        if result_step.parents.len() != 1 {
            return Err(ExecutionError::InvalidResultStep(result_step.parents.len()));
        }

        let result_node = Arc::new(ResultNode::new());
        let mut builder = StateBuilder::new(&plan);
        builder.wire_parents(result_step, result_node.clone())?;
        let (sources, controllers) = builder.finish();

        if sources.is_empty() {
            return Err(ExecutionError::EmptySources);
        }
        for controller in controllers.values() {
            controller.seal();
        }

        let query_id = Uuid::new_v4();
        debug!(
            %query_id,
            sources = sources.len(),
            nodes = controllers.len(),
            "Generated execution state"
        );
        metrics::record_plan_built("state", controllers.len());

        Ok(Self {
            query_id,
            plan,
            sources,
            controllers,
            result_node,
            storage,
            config,
            kill: CancellationToken::new(),
            status: Mutex::new(ExecutionStatus::Built),
        })
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn plan(&self) -> &Arc<PhysicalPlan> {
        &self.plan
    }

    /// Sources in the order the walk reached them
    pub fn sources(&self) -> &[SourceStep] {
        &self.sources
    }

    pub fn controller(&self, id: &TransformId) -> Option<&Arc<TransformController>> {
        self.controllers.get(id)
    }

    pub fn result_node(&self) -> &Arc<ResultNode> {
        &self.result_node
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupts the query. Sources still running fail with
    /// `StorageError::QueryInterrupted`.
    pub fn interrupt(&self) {
        self.kill.cancel();
    }

    /// Runs every source concurrently and waits for all of them.
    ///
    /// The first source failure fails the query; there are no partial results.
    pub async fn execute(&self, ctx: &CancellationToken) -> ExecutionResult<()> {
        self.begin()?;
        let start = Instant::now();
        let child = ctx.child_token();
        let options = FetchOptions {
            limit: self.config.fetch_limit,
            kill: self.kill.clone(),
        };

        let requests: Vec<SourceRequest> = self
            .sources
            .iter()
            .map(|source| SourceRequest {
                source: source.clone(),
                storage: self.storage.clone(),
                options: options.clone(),
            })
            .collect();
        let run = execute_parallel(&child, requests);

        let result = match self.config.timeout {
            Some(timeout) => {
                let deadline = tokio::time::sleep(timeout);
                tokio::pin!(deadline);
                tokio::select! {
                    result = run => result.map_err(ExecutionError::from),
                    _ = deadline.as_mut() => {
                        child.cancel();
                        Err(ExecutionError::Timeout(timeout))
                    }
                }
            }
            None => run.await.map_err(ExecutionError::from),
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_query(elapsed_ms, result.is_ok());
        match &result {
            Ok(()) => {
                self.set_status(ExecutionStatus::Succeeded);
                info!(
                    query_id = %self.query_id,
                    sources = self.sources.len(),
                    elapsed_ms,
                    "Query executed"
                );
            }
            Err(err) => {
                self.set_status(ExecutionStatus::Failed);
                warn!(query_id = %self.query_id, error = %err, elapsed_ms, "Query failed");
            }
        }
        result
    }

    fn begin(&self) -> ExecutionResult<()> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status != ExecutionStatus::Built {
            return Err(ExecutionError::AlreadyExecuted(*status));
        }
        *status = ExecutionStatus::Executing;
        Ok(())
    }

    fn set_status(&self, next: ExecutionStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

struct SourceRequest {
    source: SourceStep,
    storage: Arc<dyn Storage>,
    options: FetchOptions,
}

#[async_trait]
impl Request for SourceRequest {
    type Output = ();
    type Error = ExecutionError;

    async fn process(&self, ctx: &CancellationToken) -> ExecutionResult<()> {
        debug!("Executing source {}", self.source.id);
        self.source
            .node
            .execute(ctx, self.storage.as_ref(), &self.options)
            .await
    }
}

/// Depth-first construction state
struct StateBuilder<'a> {
    plan: &'a PhysicalPlan,
    sources: Vec<SourceStep>,
    /// Steps fully built, with the controller their children register with
    built: HashMap<TransformId, Arc<TransformController>>,
    /// Steps on the current walk path
    in_progress: HashSet<TransformId>,
}

impl<'a> StateBuilder<'a> {
    fn new(plan: &'a PhysicalPlan) -> Self {
        Self {
            plan,
            sources: Vec::new(),
            built: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Builds `step` once and returns the controller carrying its output
    fn create_node(&mut self, step: &LogicalStep) -> ExecutionResult<Arc<TransformController>> {
        let id = step.id();
        if let Some(controller) = self.built.get(id) {
            return Ok(controller.clone());
        }
        if !self.in_progress.insert(id.clone()) {
            return Err(ExecutionError::CycleDetected(id.clone()));
        }

        let controller = Arc::new(TransformController::new(id.clone()));
        match step.transform.op() {
            Op::Source(op) => {
                self.sources.push(SourceStep {
                    id: id.clone(),
                    node: op.node(controller.clone()),
                });
            }
            Op::Transform(op) => {
                let node = op.node(controller.clone());
                self.wire_parents(step, node)?;
            }
        }

        self.in_progress.remove(id);
        self.built.insert(id.clone(), controller.clone());
        Ok(controller)
    }

    /// Builds every parent of `step` and registers `node` downstream of each
    fn wire_parents(&mut self, step: &LogicalStep, node: Arc<dyn OpNode>) -> ExecutionResult<()> {
        let plan = self.plan;
        for parent_id in &step.parents {
            let parent = plan
                .step(parent_id)
                .ok_or_else(|| ExecutionError::MissingParent {
                    parent: parent_id.clone(),
                    child: step.id().clone(),
                })?;
            let controller = self.create_node(parent)?;
            controller.add_transform(node.clone())?;
        }
        Ok(())
    }

    fn finish(
        self,
    ) -> (
        Vec<SourceStep>,
        HashMap<TransformId, Arc<TransformController>>,
    ) {
        (self.sources, self.built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tags, METRIC_NAME_TAG};
    use crate::query::functions::{CountOp, FetchOp};
    use crate::query::operation::{Edge, Transform};
    use crate::query::plan::LogicalPlan;
    use crate::storage::{
        DataPoint, FetchQuery, FetchResult, MemoryStorage, SearchResults, StorageType, WriteQuery,
    };
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn fetch(id: &str) -> Arc<Transform> {
        Arc::new(Transform::new(id, Op::source(FetchOp::new("cpu"))))
    }

    fn count(id: &str) -> Arc<Transform> {
        Arc::new(Transform::new(id, Op::transform(CountOp)))
    }

    fn physical(transforms: &[Arc<Transform>], edges: &[Edge]) -> Arc<PhysicalPlan> {
        let lp = LogicalPlan::generate(transforms, edges).unwrap();
        Arc::new(PhysicalPlan::generate(&lp).unwrap())
    }

    async fn memory_storage(hosts: &[&str]) -> Arc<dyn Storage> {
        let storage = MemoryStorage::new("default");
        let at = Utc::now() - chrono::Duration::seconds(30);
        for host in hosts {
            let query = WriteQuery {
                raw: String::new(),
                tags: Tags::new().with(METRIC_NAME_TAG, "cpu").with("host", *host),
                datapoints: vec![DataPoint::new(at, 1.0)],
            };
            storage
                .write(&CancellationToken::new(), &query)
                .await
                .unwrap();
        }
        Arc::new(storage)
    }

    /// Counts fetches and optionally fails them
    #[derive(Default)]
    struct CountingStorage {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn fetch(
            &self,
            _ctx: &CancellationToken,
            _query: &FetchQuery,
            _options: &FetchOptions,
        ) -> Result<FetchResult, StorageError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::Unavailable("down".to_string()));
            }
            Ok(FetchResult::default())
        }

        async fn fetch_tags(
            &self,
            _ctx: &CancellationToken,
            _query: &FetchQuery,
            _options: &FetchOptions,
        ) -> Result<SearchResults, StorageError> {
            Ok(SearchResults::default())
        }

        async fn write(
            &self,
            _ctx: &CancellationToken,
            _query: &WriteQuery,
        ) -> Result<(), StorageError> {
            Ok(())
        }

        fn storage_type(&self) -> StorageType {
            StorageType::LocalDc
        }
    }

    /// Blocks every fetch until the context is cancelled or the query killed
    #[derive(Default)]
    struct BlockingStorage {
        saw_cancel: AtomicBool,
    }

    #[async_trait]
    impl Storage for BlockingStorage {
        async fn fetch(
            &self,
            ctx: &CancellationToken,
            _query: &FetchQuery,
            options: &FetchOptions,
        ) -> Result<FetchResult, StorageError> {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Err(StorageError::Cancelled)
                }
                _ = options.kill.cancelled() => Err(StorageError::QueryInterrupted),
                _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(FetchResult::default()),
            }
        }

        async fn fetch_tags(
            &self,
            _ctx: &CancellationToken,
            _query: &FetchQuery,
            _options: &FetchOptions,
        ) -> Result<SearchResults, StorageError> {
            Ok(SearchResults::default())
        }

        async fn write(
            &self,
            _ctx: &CancellationToken,
            _query: &WriteQuery,
        ) -> Result<(), StorageError> {
            Ok(())
        }

        fn storage_type(&self) -> StorageType {
            StorageType::LocalDc
        }
    }

    #[tokio::test]
    async fn test_fetch_then_count() {
        let transforms = vec![fetch("1"), count("2")];
        let edges = vec![Edge::new("1", "2")];
        let lp = LogicalPlan::generate(&transforms, &edges).unwrap();
        assert_eq!(
            lp.step(&TransformId::new("1")).unwrap().children,
            vec![TransformId::new("2")]
        );
        assert_eq!(
            lp.step(&TransformId::new("2")).unwrap().parents,
            vec![TransformId::new("1")]
        );

        let plan = Arc::new(PhysicalPlan::generate(&lp).unwrap());
        assert_eq!(plan.result_step.parents, vec![TransformId::new("2")]);

        let state = ExecutionState::generate(plan, memory_storage(&["a", "b"]).await).unwrap();
        assert_eq!(state.sources().len(), 1);
        assert_eq!(state.sources()[0].id.as_str(), "1");
        assert_eq!(state.status(), ExecutionStatus::Built);

        state.execute(&CancellationToken::new()).await.unwrap();
        assert_eq!(state.status(), ExecutionStatus::Succeeded);

        let blocks = state.result_node().blocks();
        assert_eq!(blocks.len(), 1);
        let counted = &blocks[0].series()[0];
        assert_eq!(counted.points().len(), 1);
        assert_eq!(counted.points()[0].value(), 2.0);
    }

    #[tokio::test]
    async fn test_source_runs_once() {
        let storage = Arc::new(CountingStorage::default());
        let plan = physical(&[fetch("1"), count("2")], &[Edge::new("1", "2")]);
        let state = ExecutionState::generate(plan, storage.clone()).unwrap();

        state.execute(&CancellationToken::new()).await.unwrap();
        assert_eq!(storage.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_source_failure_fails_query() {
        let storage = Arc::new(CountingStorage {
            fail: true,
            ..Default::default()
        });
        let plan = physical(&[fetch("1"), count("2")], &[Edge::new("1", "2")]);
        let state = ExecutionState::generate(plan, storage).unwrap();

        let result = state.execute(&CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ExecutionError::Storage(StorageError::Unavailable(_)))
        ));
        assert_eq!(state.status(), ExecutionStatus::Failed);
        assert!(state.result_node().blocks().is_empty());
    }

    #[tokio::test]
    async fn test_no_sources() {
        let plan = physical(&[count("1")], &[]);
        let result = ExecutionState::generate(plan, Arc::new(CountingStorage::default()));
        assert!(matches!(result, Err(ExecutionError::EmptySources)));
    }

    #[tokio::test]
    async fn test_diamond_shares_parent() {
        let transforms = vec![fetch("1"), count("2"), count("3"), count("4")];
        let edges = vec![
            Edge::new("1", "2"),
            Edge::new("1", "3"),
            Edge::new("2", "4"),
            Edge::new("3", "4"),
        ];
        let storage = memory_storage(&["a"]).await;
        let state = ExecutionState::generate(physical(&transforms, &edges), storage).unwrap();

        assert_eq!(state.sources().len(), 1);
        let controller = state.controller(&TransformId::new("1")).unwrap();
        assert_eq!(controller.downstream_count(), 2);
        assert!(controller.is_sealed());

        state.execute(&CancellationToken::new()).await.unwrap();
        // "4" counts once per parent
        assert_eq!(state.result_node().blocks().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_detected() {
        let transforms = vec![fetch("1"), count("2"), count("3"), count("4")];
        let edges = vec![
            Edge::new("1", "2"),
            Edge::new("2", "3"),
            Edge::new("3", "2"),
            Edge::new("2", "4"),
        ];
        let plan = physical(&transforms, &edges);
        let result = ExecutionState::generate(plan, Arc::new(CountingStorage::default()));

        match result {
            Err(ExecutionError::CycleDetected(id)) => assert_eq!(id.as_str(), "2"),
            Err(other) => panic!("expected CycleDetected, got {:?}", other),
            Ok(_) => panic!("expected CycleDetected"),
        }
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let lp = LogicalPlan::generate(&[fetch("1"), count("2")], &[Edge::new("1", "2")]).unwrap();
        let mut plan = PhysicalPlan::generate(&lp).unwrap();
        plan.steps
            .get_mut(&TransformId::new("2"))
            .unwrap()
            .parents
            .push(TransformId::new("9"));

        let result = ExecutionState::generate(Arc::new(plan), Arc::new(CountingStorage::default()));
        match result {
            Err(ExecutionError::MissingParent { parent, child }) => {
                assert_eq!(parent.as_str(), "9");
                assert_eq!(child.as_str(), "2");
            }
            Err(other) => panic!("expected MissingParent, got {:?}", other),
            Ok(_) => panic!("expected MissingParent"),
        }
    }

    #[tokio::test]
    async fn test_invalid_result_step() {
        let lp = LogicalPlan::generate(&[fetch("1")], &[]).unwrap();
        let mut plan = PhysicalPlan::generate(&lp).unwrap();
        plan.result_step.parents.clear();

        let result = ExecutionState::generate(Arc::new(plan), Arc::new(CountingStorage::default()));
        assert!(matches!(result, Err(ExecutionError::InvalidResultStep(0))));
    }

    #[tokio::test]
    async fn test_sealed_after_generation() {
        let plan = physical(&[fetch("1"), count("2")], &[Edge::new("1", "2")]);
        let state = ExecutionState::generate(plan, Arc::new(CountingStorage::default())).unwrap();

        let controller = state.controller(&TransformId::new("2")).unwrap();
        let result = controller.add_transform(Arc::new(ResultNode::new()));
        assert!(matches!(result, Err(ExecutionError::ControllerSealed(_))));
    }

    #[tokio::test]
    async fn test_execute_twice() {
        let plan = physical(&[fetch("1")], &[]);
        let state = ExecutionState::generate(plan, Arc::new(CountingStorage::default())).unwrap();

        state.execute(&CancellationToken::new()).await.unwrap();
        let result = state.execute(&CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ExecutionError::AlreadyExecuted(ExecutionStatus::Succeeded))
        ));
    }

    #[tokio::test]
    async fn test_timeout_cancels_sources() {
        let storage = Arc::new(BlockingStorage::default());
        let plan = physical(&[fetch("1")], &[]);
        let config = ExecutionConfig::default().with_timeout(Duration::from_millis(50));
        let state = ExecutionState::generate_with_config(plan, storage.clone(), config).unwrap();

        let result = state.execute(&CancellationToken::new()).await;
        assert!(matches!(result, Err(ExecutionError::Timeout(_))));

        let deadline = Instant::now() + Duration::from_secs(1);
        while !storage.saw_cancel.load(Ordering::SeqCst) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(storage.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_caller_cancellation() {
        let plan = physical(&[fetch("1")], &[]);
        let state =
            ExecutionState::generate(plan, Arc::new(BlockingStorage::default())).unwrap();
        let ctx = CancellationToken::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = state.execute(&ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_interrupt() {
        let plan = physical(&[fetch("1")], &[]);
        let state = ExecutionState::generate(plan, memory_storage(&["a"]).await).unwrap();

        state.interrupt();
        let err = state.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_interrupted());
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_interrupt_while_running() {
        let plan = physical(&[fetch("1")], &[]);
        let state = Arc::new(
            ExecutionState::generate(plan, Arc::new(BlockingStorage::default())).unwrap(),
        );

        let interrupter = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            interrupter.interrupt();
        });

        let err = state.execute(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_interrupted());
    }

    #[tokio::test]
    async fn test_fetch_limit_from_config() {
        let plan = physical(&[fetch("1"), count("2")], &[Edge::new("1", "2")]);
        let config = ExecutionConfig::default().with_fetch_limit(2);
        let storage = memory_storage(&["a", "b", "c"]).await;
        let state = ExecutionState::generate_with_config(plan, storage, config).unwrap();

        state.execute(&CancellationToken::new()).await.unwrap();
        let blocks = state.result_node().blocks();
        assert_eq!(blocks[0].series()[0].points()[0].value(), 2.0);
    }

    #[test]
    fn test_parallel_error_conversion() {
        let err: ExecutionError = ParallelError::<ExecutionError>::Cancelled.into();
        assert!(matches!(err, ExecutionError::Cancelled));

        let err: ExecutionError =
            ParallelError::Request(ExecutionError::Storage(StorageError::QueryInterrupted)).into();
        assert!(err.is_interrupted());
    }
}
