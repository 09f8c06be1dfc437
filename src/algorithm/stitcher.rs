//! Top-level stitching: pipeline measurements followed by global optimization

use std::time::Instant;

use crate::algorithm::backend::{ComputeBackend, create_backend};
use crate::algorithm::correlation::{PairId, PairwiseCorrelation};
use crate::algorithm::optimizer::{GlobalOptimizer, GridLayout};
use crate::algorithm::scheduler::{AbortSignal, Pipeline, PipelineStats, TileFailure};
use crate::analysis::repeatability::RepeatabilityStats;
use crate::io::configuration::StitchConfig;
use crate::io::error::Result;
use crate::io::progress::PipelineProgress;
use crate::io::source::ImageSource;
use crate::spatial::grid::{GridPosition, TileGrid};

/// How much of a layout rests on measurements
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// Tiles that failed to load or transform
    pub failed_tiles: Vec<TileFailure>,
    /// Pairs without a valid measurement
    pub invalid_pairs: Vec<PairId>,
    /// Pairs whose translation was imputed
    pub repaired_pairs: Vec<PairId>,
    /// Trusted translations excluded as outliers
    pub outliers: Vec<PairId>,
    /// Rows whose west pairs are degenerate
    pub degenerate_rows: Vec<usize>,
    /// Columns whose north pairs are degenerate
    pub degenerate_columns: Vec<usize>,
    /// Repeatability statistics of both directions
    pub repeatability: RepeatabilityStats,
    /// Tile the layout was grown from
    pub root: GridPosition,
    /// Pipeline counters
    pub pipeline: PipelineStats,
}

impl QualityReport {
    /// Whether every tile loaded and every pair was measured and trusted
    pub fn is_clean(&self) -> bool {
        self.failed_tiles.is_empty()
            && self.invalid_pairs.is_empty()
            && self.repaired_pairs.is_empty()
    }
}

/// Outcome of a successful stitching run
#[derive(Debug, Clone)]
pub struct StitchResult {
    /// Absolute tile offsets
    pub layout: GridLayout,
    /// What had to be repaired or excluded
    pub report: QualityReport,
    /// Raw pairwise measurements, sorted by tile then direction
    pub correlations: Vec<PairwiseCorrelation>,
}

/// Runs the pipeline and the optimizer with one configuration and backend
pub struct Stitcher {
    config: StitchConfig,
    backend: Box<dyn ComputeBackend>,
    abort: AbortSignal,
}

impl std::fmt::Debug for Stitcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stitcher")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Stitcher {
    /// Validate `config` and start its backend
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a bad configuration or `Backend` if
    /// the backend cannot start
    pub fn new(config: StitchConfig) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(config.backend)?;
        Ok(Self {
            config,
            backend,
            abort: AbortSignal::new(),
        })
    }

    /// Validate `config` and use a caller-supplied backend
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a bad configuration
    pub fn with_backend(config: StitchConfig, backend: Box<dyn ComputeBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            abort: AbortSignal::new(),
        })
    }

    /// Signal that stops a running `stitch`
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Backend transforms run on
    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    /// Configuration of every run
    pub const fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Measure every pair of `grid` and resolve the layout
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if the abort signal fired, `GlobalOptimization` if
    /// some tiles cannot be placed, or `PoolClosed` if the pipeline shut down
    /// mid-flight
    pub fn stitch(
        &self,
        grid: &TileGrid,
        source: &dyn ImageSource,
        progress: &dyn PipelineProgress,
    ) -> Result<StitchResult> {
        let started = Instant::now();

        let output = Pipeline::new(grid, &self.config, source, self.backend.as_ref())
            .with_progress(progress)
            .with_abort(self.abort.clone())
            .run()?;

        let (rows, cols) = grid.dimensions();
        let (layout, optimized) =
            GlobalOptimizer::from_config(&self.config).optimize(rows, cols, &output.correlations)?;

        let report = QualityReport {
            failed_tiles: output.failed_tiles,
            invalid_pairs: optimized.invalid_pairs,
            repaired_pairs: optimized.repaired_pairs,
            outliers: optimized.stats.outliers.clone(),
            degenerate_rows: optimized.stats.degenerate_rows(),
            degenerate_columns: optimized.stats.degenerate_columns(),
            repeatability: optimized.stats,
            root: optimized.root,
            pipeline: output.stats,
        };

        log::info!(
            "Stitched {rows}x{cols} grid in {:.2?}: {} failed tile(s), {} repaired pair(s)",
            started.elapsed(),
            report.failed_tiles.len(),
            report.repaired_pairs.len()
        );

        Ok(StitchResult {
            layout,
            report,
            correlations: output.correlations,
        })
    }
}
