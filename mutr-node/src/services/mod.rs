//! Service modules for node analysis
//!
//! The coordinator, worker, dispatcher and recovery scanner together order
//! classification so every node is analyzed after its parent.

pub mod analysis_worker;
pub mod classification_client;
pub mod coordinator;
pub mod dispatcher;
pub mod node_service;
pub mod notification;
pub mod recovery;

pub use analysis_worker::{AnalysisWorker, ProcessOutcome, ProcessReport, WorkerSettings};
pub use classification_client::{
    ClassificationEngine, EngineError, HttpClassificationEngine, ServingStatus,
};
pub use coordinator::{Admission, AnalysisCoordinator, CoordinatorSettings};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherSettings};
pub use node_service::NodeService;
pub use notification::{EventBusSink, NotificationSink};
pub use recovery::{RecoveryReport, RecoveryScanner, RecoverySettings};
