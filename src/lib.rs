//! Stitching of overlapping image tiles laid out on a regular grid
//!
//! Every adjacent pair of tiles is registered by phase correlation in a
//! pipelined scheduler with bounded buffer pools, and the pairwise
//! translations are resolved into one absolute offset per tile.

#![deny(unsafe_code)]

/// Correlation, pipeline scheduling, compute backends and global optimization
pub mod algorithm;
/// Repeatability statistics over pairwise translations
pub mod analysis;
/// Input/output operations, configuration and error handling
pub mod io;
/// Two-dimensional transforms and robust integer statistics
pub mod math;
/// Bounded pools of reusable pixel and spectrum buffers
pub mod memory;
/// Tile grid, traversal orders and tile lifecycle
pub mod spatial;

pub use algorithm::stitcher::{StitchResult, Stitcher};
pub use io::error::{Result, StitchError};
