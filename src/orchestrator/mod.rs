//! Per-iteration scheduling of measurement tasks
//!
//! - `task`: what runs each iteration and which columns it fills
//! - `surveyor`: the dispatch/join/commit loop

pub mod surveyor;
pub mod task;

pub use surveyor::{IterationPhase, Surveyor, SurveyorBuilder, shutdown_requested};
pub use task::{MeasurementTask, TaskKind, TaskSource};
