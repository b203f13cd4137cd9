//! `geff` library crate.
//!
//! Global multi-source detector efficiency fit: a log-polynomial shape shared
//! by every calibration source, one scale factor per source, a joint
//! chi-square minimized by Levenberg–Marquardt, and a propagated 1σ band.
//!
//! The binary (`geff`) is a thin wrapper around this library so that the
//! fitting core is testable without spawning processes.

pub mod app;
pub mod cli;
pub mod curve;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod settings;
