//! Error types and failure classes for stitching operations

use std::fmt;
use std::path::PathBuf;

use crate::spatial::grid::{Direction, GridPosition};
use crate::spatial::tiles::TileState;

/// Main error type for all stitching operations
#[derive(Debug)]
pub enum StitchError {
    /// Grid constructed with zero rows or zero columns
    EmptyGrid {
        /// Requested row count
        rows: usize,
        /// Requested column count
        cols: usize,
    },

    /// A tile's pixels could not be supplied
    ///
    /// Recovered per tile: the tile is excluded from correlation and the
    /// failure is carried in the quality report.
    LoadFailure {
        /// Grid position of the tile
        position: GridPosition,
        /// Name the image source was asked for
        source_name: String,
        /// Description of the failure
        reason: String,
    },

    /// Acquire on a buffer pool or work queue that has been shut down
    PoolClosed {
        /// Label of the closed pool
        pool: &'static str,
    },

    /// No peak of a pair satisfied the translation bound
    ///
    /// Recovered per pair: the pair is reported with zero confidence.
    InvalidCorrelation {
        /// The tile being correlated
        position: GridPosition,
        /// Direction of the neighbour it was correlated against
        direction: Direction,
        /// Description of why no candidate was accepted
        reason: String,
    },

    /// The grid could not be made consistent
    GlobalOptimization {
        /// Tiles left without a measured or imputed offset
        unresolved: Vec<GridPosition>,
    },

    /// The pipeline abort signal fired before the run completed
    Aborted,

    /// Configuration validation failed
    InvalidParameter {
        /// Name of the invalid parameter
        parameter: &'static str,
        /// Provided value that failed validation
        value: String,
        /// Explanation of why the value is invalid
        reason: String,
    },

    /// A tile was asked to skip or repeat a lifecycle state
    InvalidTransition {
        /// Grid position of the tile
        position: GridPosition,
        /// State the tile was in
        from: TileState,
        /// State that was requested
        to: TileState,
    },

    /// A compute backend could not run a job
    Backend {
        /// Name of the backend
        backend: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// Failed to decode an image from disk
    ImageLoad {
        /// Path to the image file
        path: PathBuf,
        /// Underlying image loading error
        source: image::ImageError,
    },

    /// General file system operation failure
    FileSystem {
        /// Path involved in the operation
        path: PathBuf,
        /// Description of the operation that failed
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl fmt::Display for StitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyGrid { rows, cols } => {
                write!(f, "Grid of {rows}x{cols} tiles contains no tiles")
            }
            Self::LoadFailure {
                position,
                source_name,
                reason,
            } => {
                write!(f, "Failed to load tile {position} ('{source_name}'): {reason}")
            }
            Self::PoolClosed { pool } => {
                write!(f, "The {pool} pool was closed while work was in flight")
            }
            Self::InvalidCorrelation {
                position,
                direction,
                reason,
            } => {
                write!(
                    f,
                    "Invalid correlation of tile {position} against its {} neighbour: {reason}",
                    direction.name()
                )
            }
            Self::GlobalOptimization { unresolved } => match unresolved_region(unresolved) {
                Some((min, max)) => write!(
                    f,
                    "Global optimization left {} tile(s) unresolved in region rows {}..={} cols {}..={}",
                    unresolved.len(),
                    min.row,
                    max.row,
                    min.col,
                    max.col
                ),
                None => write!(f, "Global optimization failed"),
            },
            Self::Aborted => write!(f, "Pipeline aborted"),
            Self::InvalidParameter {
                parameter,
                value,
                reason,
            } => {
                write!(f, "Invalid parameter '{parameter}' = '{value}': {reason}")
            }
            Self::InvalidTransition { position, from, to } => {
                write!(
                    f,
                    "Tile {position} cannot move from {} to {}",
                    from.name(),
                    to.name()
                )
            }
            Self::Backend { backend, reason } => {
                write!(f, "Compute backend '{backend}' failed: {reason}")
            }
            Self::ImageLoad { path, source } => {
                write!(f, "Failed to load image '{}': {source}", path.display())
            }
            Self::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "File system error during {operation} on '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for StitchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ImageLoad { source, .. } => Some(source),
            Self::FileSystem { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl StitchError {
    /// Whether this failure aborts a whole stitching run
    ///
    /// Per-tile and per-pair failures are absorbed into confidence annotations.
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::LoadFailure { .. } | Self::InvalidCorrelation { .. }
        )
    }
}

/// Bounding rows/columns of a set of positions
fn unresolved_region(positions: &[GridPosition]) -> Option<(GridPosition, GridPosition)> {
    let first = positions.first()?;
    let (min, max) = positions.iter().fold((*first, *first), |(min, max), p| {
        (
            GridPosition::new(min.row.min(p.row), min.col.min(p.col)),
            GridPosition::new(max.row.max(p.row), max.col.max(p.col)),
        )
    });
    Some((min, max))
}

/// Convenience type alias for stitching results
pub type Result<T> = std::result::Result<T, StitchError>;

impl From<image::ImageError> for StitchError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageLoad {
            path: PathBuf::from("<unknown>"),
            source: err,
        }
    }
}

impl From<std::io::Error> for StitchError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: "unknown",
            source: err,
        }
    }
}

/// Create an invalid parameter error
pub fn invalid_parameter(
    parameter: &'static str,
    value: &impl ToString,
    reason: &impl ToString,
) -> StitchError {
    StitchError::InvalidParameter {
        parameter,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a compute backend error
pub fn backend_error(backend: &'static str, reason: &impl ToString) -> StitchError {
    StitchError::Backend {
        backend,
        reason: reason.to_string(),
    }
}
