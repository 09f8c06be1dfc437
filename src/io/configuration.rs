//! Stitching constants and the immutable run configuration

use std::num::NonZeroUsize;

use crate::algorithm::backend::BackendKind;
use crate::io::error::{Result, invalid_parameter};
use crate::math::statistics::Estimator;
use crate::spatial::traversal::Traversal;

// Correlation defaults
/// Number of correlation peaks examined per pair
pub const DEFAULT_PEAK_CANDIDATES: usize = 2;
/// Upper limit on peaks examined per pair
pub const MAX_PEAK_CANDIDATES: usize = 64;
/// Smallest expected overlap between neighbours, in percent of the tile
pub const DEFAULT_MIN_OVERLAP_PERCENT: f64 = 0.0;
/// Largest expected overlap between neighbours, in percent of the tile
pub const DEFAULT_MAX_OVERLAP_PERCENT: f64 = 50.0;
/// Largest perpendicular drift between neighbours, in percent of the tile
pub const DEFAULT_MAX_DRIFT_PERCENT: f64 = 10.0;
/// Smallest overlap area, in pixels, that is scored at all
pub const DEFAULT_MIN_OVERLAP_PIXELS: usize = 16;

// Below this magnitude a cross-power term carries no phase information
/// Magnitude under which a cross-power term is zeroed
pub const CROSS_POWER_EPSILON: f64 = 1e-12;

// Repair defaults
/// Confidence at or above which a measurement is trusted
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Trusted samples a row or column needs before its own estimate is used
pub const DEFAULT_MIN_SAMPLES: usize = 1;

// Safety limit to prevent excessive memory allocation
/// Maximum allowed grid dimension
pub const MAX_GRID_DIMENSION: usize = 10_000;

// Pipeline scheduling
/// Work queue priority of pair correlations
pub const CORRELATE_PRIORITY: u32 = 1;
/// Work queue priority of tile loads and transforms
pub const PREPARE_PRIORITY: u32 = 0;
/// How often the bookkeeper checks the abort signal, in milliseconds
pub const ABORT_POLL_INTERVAL_MS: u64 = 20;

// Progress bar display settings
/// Width of progress bars in characters
pub const PROGRESS_BAR_WIDTH: u16 = 40;

// Synthetic mosaics and command line defaults
/// Fixed seed for reproducible synthetic mosaics
pub const DEFAULT_SEED: u64 = 42;
/// Side length of synthetic tiles in pixels
pub const DEFAULT_SYNTHETIC_TILE_SIZE: usize = 64;
/// Overlap of synthetic neighbours in percent
pub const DEFAULT_SYNTHETIC_OVERLAP_PERCENT: f64 = 20.0;
/// Largest random displacement of a synthetic tile from its nominal position
pub const DEFAULT_SYNTHETIC_JITTER: i64 = 2;
/// Filename pattern of synthetic tiles
pub const SYNTHETIC_PATTERN: &str = "tile_r{rr}_c{cc}.png";
/// Default filename pattern for tiles on disk
pub const DEFAULT_PATTERN: &str = "tile_r{rr}_c{cc}.png";

// Output settings
/// File receiving absolute tile positions
pub const POSITIONS_FILE: &str = "positions.tsv";
/// File receiving pairwise translations
pub const TRANSLATIONS_FILE: &str = "translations.tsv";

/// Expected overlap range between adjacent tiles, in percent of tile size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapBounds {
    /// Smallest overlap
    pub min_percent: f64,
    /// Largest overlap
    pub max_percent: f64,
}

impl Default for OverlapBounds {
    fn default() -> Self {
        Self {
            min_percent: DEFAULT_MIN_OVERLAP_PERCENT,
            max_percent: DEFAULT_MAX_OVERLAP_PERCENT,
        }
    }
}

/// How untrusted translations are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    /// Statistic taken over trusted translations
    pub estimator: Estimator,
    /// Trusted samples a row or column needs for its own estimate;
    /// with fewer, the direction-wide estimate is used
    pub min_samples: usize,
    /// Trusted translations further than this from their direction
    /// estimate, on either axis, are treated as outliers and repaired
    pub outlier_tolerance: Option<i64>,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            estimator: Estimator::Median,
            min_samples: DEFAULT_MIN_SAMPLES,
            outlier_tolerance: None,
        }
    }
}

/// Immutable configuration handed to a stitching run
#[derive(Debug, Clone, PartialEq)]
pub struct StitchConfig {
    /// Order in which tiles enter the pipeline
    pub traversal: Traversal,
    /// Compute backend for transforms
    pub backend: BackendKind,
    /// Worker threads running load, transform and correlation tasks
    pub workers: usize,
    /// Tiles whose buffers may be in flight at once; derived when `None`
    pub pool_capacity: Option<usize>,
    /// Tile `(height, width)`; asked from the image source when `None`
    pub tile_shape: Option<(usize, usize)>,
    /// Correlation peaks examined per pair
    pub peak_candidates: usize,
    /// Expected overlap between neighbours
    pub overlap: OverlapBounds,
    /// Largest perpendicular drift between neighbours, in percent
    pub max_drift_percent: f64,
    /// Smallest overlap area scored, in pixels
    pub min_overlap_pixels: usize,
    /// Confidence at or above which a measurement is trusted
    pub confidence_threshold: f64,
    /// Repair of untrusted translations
    pub repair: RepairPolicy,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            traversal: Traversal::default(),
            backend: BackendKind::default(),
            workers: default_workers(),
            pool_capacity: None,
            tile_shape: None,
            peak_candidates: DEFAULT_PEAK_CANDIDATES,
            overlap: OverlapBounds::default(),
            max_drift_percent: DEFAULT_MAX_DRIFT_PERCENT,
            min_overlap_pixels: DEFAULT_MIN_OVERLAP_PIXELS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            repair: RepairPolicy::default(),
        }
    }
}

/// Available parallelism, at least one
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

impl StitchConfig {
    /// Check every field against its valid range
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(invalid_parameter(
                "workers",
                &self.workers,
                &"at least one worker is required",
            ));
        }
        if self.pool_capacity == Some(0) {
            return Err(invalid_parameter(
                "pool_capacity",
                &0,
                &"a pool needs at least one buffer",
            ));
        }
        if let Some((height, width)) = self.tile_shape {
            if height == 0 || width == 0 {
                return Err(invalid_parameter(
                    "tile_shape",
                    &format!("{height}x{width}"),
                    &"tiles must have at least one pixel",
                ));
            }
        }
        if !(1..=MAX_PEAK_CANDIDATES).contains(&self.peak_candidates) {
            return Err(invalid_parameter(
                "peak_candidates",
                &self.peak_candidates,
                &format!("must be between 1 and {MAX_PEAK_CANDIDATES}"),
            ));
        }

        let OverlapBounds {
            min_percent,
            max_percent,
        } = self.overlap;
        if !(0.0..=100.0).contains(&min_percent)
            || !(0.0..=100.0).contains(&max_percent)
            || min_percent > max_percent
        {
            return Err(invalid_parameter(
                "overlap",
                &format!("{min_percent}..{max_percent}"),
                &"percentages must satisfy 0 <= min <= max <= 100",
            ));
        }
        if !(0.0..=100.0).contains(&self.max_drift_percent) {
            return Err(invalid_parameter(
                "max_drift_percent",
                &self.max_drift_percent,
                &"must be between 0 and 100",
            ));
        }
        if self.min_overlap_pixels == 0 {
            return Err(invalid_parameter(
                "min_overlap_pixels",
                &self.min_overlap_pixels,
                &"must be at least 1",
            ));
        }
        if !(-1.0..=1.0).contains(&self.confidence_threshold) {
            return Err(invalid_parameter(
                "confidence_threshold",
                &self.confidence_threshold,
                &"must be between -1 and 1",
            ));
        }
        if self.repair.min_samples == 0 {
            return Err(invalid_parameter(
                "min_samples",
                &self.repair.min_samples,
                &"must be at least 1",
            ));
        }
        if let Some(tolerance) = self.repair.outlier_tolerance {
            if tolerance < 0 {
                return Err(invalid_parameter(
                    "outlier_tolerance",
                    &tolerance,
                    &"must not be negative",
                ));
            }
        }
        Ok(())
    }

    /// Buffers per pool for a `rows x cols` grid
    ///
    /// Never below what the traversal needs to make progress, and never
    /// above the number of tiles.
    pub fn effective_pool_capacity(&self, rows: usize, cols: usize) -> usize {
        let minimum = self.traversal.minimum_in_flight(rows, cols);
        let requested = self
            .pool_capacity
            .map_or(minimum + self.workers, |capacity| capacity.max(minimum));
        requested.min(rows * cols).max(1)
    }
}
