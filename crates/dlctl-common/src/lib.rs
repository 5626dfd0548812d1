//! dlctl common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types, logging setup and error handling for the data lake
//! lifecycle controller.
//!
//! # Overview
//!
//! - **Error Handling**: [`DlctlError`] and the crate [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//! - **Types**: control/stage records, job catalog entries and the file status enum
//!
//! # Example
//!
//! ```
//! use dlctl_common::types::FileStatus;
//!
//! let status: FileStatus = "PROCESSING".parse().unwrap();
//! assert!(status.can_advance_to(FileStatus::Loaded));
//! assert!(!FileStatus::Loaded.can_advance_to(FileStatus::Failed));
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DlctlError, Result};
