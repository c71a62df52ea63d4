//! # Flyer Common Library
//!
//! Shared code for the flyer services including:
//! - Error and result types
//! - Event types (FlyerEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
