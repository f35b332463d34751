//! Doyen Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Doyen ingestion workspace.
//!
//! - **Error Handling**: [`DoyenError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]

pub mod error;
pub mod logging;

pub use error::{DoyenError, Result};
