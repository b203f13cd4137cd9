//! Input/output helpers.
//!
//! - measurement file ingest + validation (`ingest`)
//! - text and CSV result exports (`export`)
//! - curve JSON read/write (`curve`)

pub mod curve;
pub mod export;
pub mod ingest;

pub use curve::*;
pub use export::*;
pub use ingest::*;
