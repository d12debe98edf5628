//! Shared utilities that glue the different domains together.
pub mod config;
pub mod error;
pub mod frame;
pub mod fs;
pub mod log;
pub mod time;

pub use error::{CsatError, CsatResult, ErrorCode};
