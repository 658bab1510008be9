//! HTTP API handlers for mutr-node

pub mod health;
pub mod nodes;
pub mod sse;

pub use health::health_routes;
pub use nodes::node_routes;
pub use sse::event_stream;
