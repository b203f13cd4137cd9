//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - input observations and the per-source measurement set
//! - engine configuration (`FitConfig`) and the flat parameter layout
//! - fit outputs (`FitResult`, `CurvePoint`, `CurveFile`, etc.)

pub mod types;

pub use types::*;
