use chrono::{Duration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use tscoord::config::ExecutionConfig;
use tscoord::metrics;
use tscoord::models::{Tags, METRIC_NAME_TAG};
use tscoord::query::functions::{CountOp, FetchOp};
use tscoord::query::{Edge, ExecutionState, LogicalPlan, Op, PhysicalPlan, Transform};
use tscoord::storage::{fanout, DataPoint, FanoutStorage, MemoryStorage, Storage, StorageType, WriteQuery};

#[tokio::main]
async fn main() {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(true)
        .pretty()
        .init();

    // Initialize metrics
    let metrics_addr = SocketAddr::from(([127, 0, 0, 1], 9090));
    if let Err(e) = metrics::init_metrics(metrics_addr) {
        eprintln!("Failed to initialize metrics: {}", e);
    } else {
        info!("Metrics server listening on {}", metrics_addr);
    }

    info!("Starting tscoord...");

    if let Err(e) = run().await {
        error!("Query failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = CancellationToken::new();
    let local: Arc<dyn Storage> = Arc::new(MemoryStorage::new("local"));
    let remote: Arc<dyn Storage> =
        Arc::new(MemoryStorage::new("remote").with_type(StorageType::RemoteDc));
    let storage = Arc::new(FanoutStorage::new(vec![local, remote], fanout::allow_all));

    // Seed a few hosts with a minute of samples
    let now = Utc::now();
    for host in ["a", "b", "c"] {
        let datapoints = (1..=6)
            .rev()
            .map(|i| DataPoint::new(now - Duration::seconds(i * 10), i as f64))
            .collect();
        let query = WriteQuery {
            raw: String::new(),
            tags: Tags::new().with(METRIC_NAME_TAG, "cpu").with("host", host),
            datapoints,
        };
        storage.write(&ctx, &query).await?;
    }

    let transforms = vec![
        Arc::new(Transform::from_operation(
            Op::source(FetchOp::new("cpu").with_range(Duration::minutes(2))),
            1,
        )),
        Arc::new(Transform::from_operation(Op::transform(CountOp), 2)),
    ];
    let edges = vec![Edge::new("1", "2")];

    let logical = LogicalPlan::generate(&transforms, &edges)?;
    info!("Logical plan: {}", logical);
    let physical = Arc::new(PhysicalPlan::generate(&logical)?);

    let config = ExecutionConfig::default().with_timeout(std::time::Duration::from_secs(5));
    let state = ExecutionState::generate_with_config(physical, storage, config)?;
    info!(query_id = %state.query_id(), "Physical plan: {}", state.plan());
    state.execute(&ctx).await?;

    for block in state.result_node().take_blocks() {
        for series in block.into_series() {
            for point in series.points() {
                info!("{} {} = {}", series.name(), point.timestamp(), point.value());
            }
        }
    }
    Ok(())
}
