//! Livesim - Live DASH simulation from looping VoD content
//!
//! This library crate exposes the core functionality for integration testing.

pub mod analysis;
pub mod config;
pub mod error;
pub mod streaming;
pub mod timing;

pub use error::{LiveError, Result};
