//! Data models for mutr-node

pub mod analysis;
pub mod node;

pub use analysis::{AnalysisContext, AnalysisRequest, AnalysisResult, ClassificationInput};
pub use node::{AnalysisStatus, Emotion, MutationFilter, Node};
