//! Core domain models for stagehand
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, run state and their configuration.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
