//! Request orchestration for Sentient
//!
//! Runs one city lookup through every stage, from coordinates to the
//! assembled palette and painting, stopping at the first failure.

pub mod error;
pub mod orchestrator;

pub use error::{PipelineError, PipelineFailure, Stage};
pub use orchestrator::{ForecastDay, Pipeline, PipelineResult, DEFAULT_REQUEST_TIMEOUT};
