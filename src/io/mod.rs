//! Input, output and the ambient plumbing around a stitching run
//!
//! This module contains:
//! - Error types and configuration constants
//! - Image sources, synthetic mosaics and result export
//! - Logging, progress reporting and the command line

/// Command-line parsing and the stitching command
pub mod cli;
/// Constants and the run configuration
pub mod configuration;
/// Error types and failure classes
pub mod error;
/// Tab-separated export of layouts and translations
pub mod export;
/// Logger installation for the binary
pub mod logging;
/// Progress observers and terminal progress bars
pub mod progress;
/// Where tile pixels come from
pub mod source;
/// Seeded synthetic mosaics with known offsets
pub mod synthetic;
