//! mutr-node library interface
//!
//! Exposes the node service pieces for the binary and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{AnalysisError, ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mutr_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::NodeServiceConfig;
use crate::services::{
    AnalysisCoordinator, AnalysisWorker, ClassificationEngine, Dispatcher, NodeService,
    NotificationSink, RecoveryScanner,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Node creation, lookup and retry
    pub node_service: NodeService,
    /// Analysis queue (for diagnostics)
    pub dispatcher: Dispatcher,
    /// Classification engine base URL (for diagnostics)
    pub engine_url: String,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        pipeline: &AnalysisPipeline,
        engine_url: String,
    ) -> Self {
        Self {
            db,
            event_bus,
            node_service: pipeline.node_service.clone(),
            dispatcher: pipeline.dispatcher.clone(),
            engine_url,
            startup_time: Utc::now(),
        }
    }
}

/// Running analysis components
pub struct AnalysisPipeline {
    pub coordinator: AnalysisCoordinator,
    pub dispatcher: Dispatcher,
    pub node_service: NodeService,
    pub recovery: Arc<RecoveryScanner>,
    pub worker_handles: Vec<JoinHandle<()>>,
}

/// Wire coordinator, worker pool, node service and recovery scanner
///
/// Workers run until `cancel` fires. Recovery is built but not started.
pub fn start_analysis_pipeline(
    db: SqlitePool,
    event_bus: EventBus,
    engine: Arc<dyn ClassificationEngine>,
    sink: Arc<dyn NotificationSink>,
    config: &NodeServiceConfig,
    cancel: CancellationToken,
) -> AnalysisPipeline {
    let coordinator = AnalysisCoordinator::new(db.clone(), config.coordinator_settings());

    let worker = Arc::new(AnalysisWorker::new(
        db.clone(),
        coordinator.clone(),
        engine.clone(),
        sink,
        config.worker_settings(),
    ));

    let (dispatcher, worker_handles) =
        Dispatcher::start(worker, config.dispatcher_settings(), cancel);

    let node_service = NodeService::new(
        db.clone(),
        dispatcher.clone(),
        event_bus,
        config.analysis.context_cutoff_chars,
    );

    let recovery = Arc::new(RecoveryScanner::new(
        db,
        coordinator.clone(),
        engine,
        dispatcher.clone(),
        config.recovery_settings(),
    ));

    AnalysisPipeline {
        coordinator,
        dispatcher,
        node_service,
        recovery,
        worker_handles,
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::node_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
