//! Shared fixtures for mutr-node integration tests
//!
//! Each test gets its own TempDir database, a scripted classification
//! engine and a sink that records every notification.

#![allow(dead_code)]

use async_trait::async_trait;
use mutr_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mutr_node::config::NodeServiceConfig;
use mutr_node::db::nodes;
use mutr_node::models::{AnalysisResult, AnalysisStatus, ClassificationInput, Node};
use mutr_node::services::{ClassificationEngine, EngineError, NotificationSink, ServingStatus};
use mutr_node::{start_analysis_pipeline, AnalysisPipeline};

/// Create temporary test database with tables applied
///
/// TempDir must be kept alive for the duration of the test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = mutr_node::db::init_database_pool(&temp_dir.path().join("test_mutr.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Config with short timeouts so failure paths finish quickly
pub fn test_config() -> NodeServiceConfig {
    let mut config = NodeServiceConfig::default();
    config.engine.timeout_ms = 2_000;
    config.engine.max_attempts = 3;
    config.engine.retry_backoff_ms = 10;
    config.analysis.worker_count = 4;
    config.analysis.max_lock_wait_ms = 5_000;
    config
}

/// One recorded engine call
#[derive(Debug, Clone)]
pub struct EngineCall {
    /// Position in the global call sequence, starting at 1
    pub order: u32,
    pub input: ClassificationInput,
}

/// Scripted classification engine
///
/// Answers `topic:<content>` for every node. Per-content scores, transient
/// failures and permanent failures can be configured up front.
pub struct StubEngine {
    counter: AtomicU32,
    calls: Mutex<Vec<EngineCall>>,
    scores: HashMap<String, f64>,
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: Vec<String>,
    delay: Duration,
    health: Mutex<ServingStatus>,
    health_checks: AtomicU32,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            scores: HashMap::new(),
            transient_failures: Mutex::new(HashMap::new()),
            permanent_failures: Vec::new(),
            delay: Duration::ZERO,
            health: Mutex::new(ServingStatus::Serving),
            health_checks: AtomicU32::new(0),
        }
    }

    /// Sleep this long inside every analyze call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_score(mut self, content: &str, score: f64) -> Self {
        self.scores.insert(content.to_string(), score);
        self
    }

    /// Fail the first `count` calls for `content`
    pub fn failing_first(self, content: &str, count: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(content.to_string(), count);
        self
    }

    /// Fail every call for `content`
    pub fn always_failing(mut self, content: &str) -> Self {
        self.permanent_failures.push(content.to_string());
        self
    }

    pub fn with_health(self, status: ServingStatus) -> Self {
        *self.health.lock().unwrap() = status;
        self
    }

    pub fn set_health(&self, status: ServingStatus) {
        *self.health.lock().unwrap() = status;
    }

    pub fn topic_for(content: &str) -> String {
        format!("topic:{}", content)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made for one piece of content
    pub fn calls_for(&self, content: &str) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.input.content == content)
            .collect()
    }

    /// Order of the last call made for `content`
    pub fn last_order(&self, content: &str) -> Option<u32> {
        self.calls_for(content).last().map(|call| call.order)
    }

    pub fn health_checks(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationEngine for StubEngine {
    async fn analyze(&self, input: &ClassificationInput) -> Result<AnalysisResult, EngineError> {
        let order = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(EngineCall {
            order,
            input: input.clone(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.permanent_failures.contains(&input.content) {
            return Err(EngineError::Api(503, "model unavailable".to_string()));
        }

        {
            let mut transient = self.transient_failures.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&input.content) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::Network("connection reset".to_string()));
                }
            }
        }

        Ok(AnalysisResult {
            topic: Self::topic_for(&input.content),
            emotion: "Joy".to_string(),
            confidence: 0.9,
            mutation_score: self.scores.get(&input.content).copied().unwrap_or(0.5),
        })
    }

    async fn health(&self) -> Result<ServingStatus, EngineError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        Ok(*self.health.lock().unwrap())
    }
}

/// Sink recording every notification
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(String, Node)>>,
    failures: Mutex<Vec<(i64, String)>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<(String, Node)> {
        self.published.lock().unwrap().clone()
    }

    /// Notifications delivered for one node
    pub fn published_for(&self, node_id: i64) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, node)| node.id == node_id)
            .count()
    }

    pub fn failures(&self) -> Vec<(i64, String)> {
        self.failures.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, channel: &str, node: &Node) {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), node.clone()));
    }

    fn publish_failure(&self, node_id: i64, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((node_id, error.to_string()));
    }
}

/// A running analysis pipeline over a temporary database
pub struct TestEnv {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub engine: Arc<StubEngine>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: AnalysisPipeline,
    pub cancel: CancellationToken,
    _temp_dir: TempDir,
}

impl TestEnv {
    pub async fn start(engine: StubEngine) -> Self {
        Self::start_with_config(engine, test_config()).await
    }

    pub async fn start_with_config(engine: StubEngine, config: NodeServiceConfig) -> Self {
        let (temp_dir, pool) = create_test_db().await;
        Self::start_on(temp_dir, pool, engine, config)
    }

    /// Start a pipeline over an existing database (simulated restart)
    pub fn start_on(
        temp_dir: TempDir,
        pool: SqlitePool,
        engine: StubEngine,
        config: NodeServiceConfig,
    ) -> Self {
        let event_bus = EventBus::new(256);
        let engine = Arc::new(engine);
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();

        let pipeline = start_analysis_pipeline(
            pool.clone(),
            event_bus.clone(),
            engine.clone(),
            sink.clone(),
            &config,
            cancel.clone(),
        );

        Self {
            pool,
            event_bus,
            engine,
            sink,
            pipeline,
            cancel,
            _temp_dir: temp_dir,
        }
    }

    pub async fn create(&self, parent_id: Option<i64>, content: &str) -> Node {
        self.pipeline
            .node_service
            .create_node(parent_id, content)
            .await
            .unwrap()
    }

    pub async fn wait_for(&self, node_id: i64, status: AnalysisStatus) -> Node {
        wait_for_status(&self.pool, node_id, status, Duration::from_secs(10)).await
    }

    /// Wait until nothing is queued or running in this process
    pub async fn wait_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.pipeline.dispatcher.tracked_count() > 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "dispatcher still busy after 10s"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Poll until the node reaches `status`; panics after `timeout`
pub async fn wait_for_status(
    pool: &SqlitePool,
    node_id: i64,
    status: AnalysisStatus,
    timeout: Duration,
) -> Node {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let node = nodes::get_node(pool, node_id).await.unwrap();
        if node.analysis_status == status {
            return node;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node {} stuck in {} waiting for {}",
            node_id,
            node.analysis_status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Force a status without going through the transitions (crash simulation)
pub async fn force_status(pool: &SqlitePool, node_id: i64, status: AnalysisStatus) {
    sqlx::query("UPDATE nodes SET analysis_status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(node_id)
        .execute(pool)
        .await
        .unwrap();
}
