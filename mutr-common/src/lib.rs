//! # MUTR Common Library
//!
//! Shared code for MUTR services including:
//! - Event types (MutrEvent enum) and the EventBus
//! - Configuration loading and data folder resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
