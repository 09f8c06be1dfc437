//! Command-line interface: stitch a directory of tiles or a synthetic mosaic

use crate::algorithm::backend::BackendKind;
use crate::algorithm::stitcher::{StitchResult, Stitcher};
use crate::io::configuration::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_DRIFT_PERCENT, DEFAULT_MAX_OVERLAP_PERCENT,
    DEFAULT_MIN_OVERLAP_PERCENT, DEFAULT_MIN_OVERLAP_PIXELS, DEFAULT_MIN_SAMPLES, DEFAULT_PATTERN,
    DEFAULT_PEAK_CANDIDATES, DEFAULT_SEED, DEFAULT_SYNTHETIC_JITTER, DEFAULT_SYNTHETIC_OVERLAP_PERCENT,
    DEFAULT_SYNTHETIC_TILE_SIZE, OverlapBounds, POSITIONS_FILE, RepairPolicy, StitchConfig,
    TRANSLATIONS_FILE, default_workers,
};
use crate::io::error::{Result, StitchError, invalid_parameter};
use crate::io::export::{write_positions, write_translations};
use crate::io::progress::{NoProgress, PipelineProgress, ProgressManager};
use crate::io::source::{DirectorySource, ImageSource};
use crate::io::synthetic::SyntheticSpec;
use crate::math::statistics::Estimator;
use crate::spatial::grid::TileGrid;
use crate::spatial::naming::FilenamePattern;
use crate::spatial::traversal::Traversal;
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "gridstitch")]
#[command(
    author,
    version,
    about = "Stitch a grid of overlapping image tiles by phase correlation"
)]
/// Command-line arguments for the stitching tool
// Independent switches for synthetic input and output verbosity
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Directory holding the tile images
    #[arg(value_name = "TARGET", required_unless_present = "synthetic")]
    pub target: Option<PathBuf>,

    /// Number of tile rows
    #[arg(short, long, required_unless_present = "synthetic")]
    pub rows: Option<usize>,

    /// Number of tile columns
    #[arg(short, long, required_unless_present = "synthetic")]
    pub cols: Option<usize>,

    /// Filename template, e.g. `tile_r{rr}_c{cc}.png` or `img_{pppp}.tif`
    #[arg(short, long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Treat the template as one running number instead of row and column
    #[arg(long)]
    pub sequential: bool,

    /// Acquisition order that assigns sequential numbers
    #[arg(long, value_enum, default_value_t = Traversal::Row)]
    pub numbering: Traversal,

    /// First index used in filenames
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Order in which tiles enter the pipeline
    #[arg(short, long, value_enum, default_value_t = Traversal::default())]
    pub traversal: Traversal,

    /// Compute backend for transforms
    #[arg(short, long, value_enum, default_value_t = BackendKind::default())]
    pub backend: BackendKind,

    /// Worker threads
    #[arg(short, long, default_value_t = default_workers())]
    pub workers: usize,

    /// Buffers per pool; derived from the grid when omitted
    #[arg(long)]
    pub pool_capacity: Option<usize>,

    /// Correlation peaks examined per pair
    #[arg(long, default_value_t = DEFAULT_PEAK_CANDIDATES)]
    pub peaks: usize,

    /// Smallest expected overlap in percent
    #[arg(long, default_value_t = DEFAULT_MIN_OVERLAP_PERCENT)]
    pub min_overlap: f64,

    /// Largest expected overlap in percent
    #[arg(long, default_value_t = DEFAULT_MAX_OVERLAP_PERCENT)]
    pub max_overlap: f64,

    /// Largest perpendicular drift in percent
    #[arg(long, default_value_t = DEFAULT_MAX_DRIFT_PERCENT)]
    pub drift: f64,

    /// Confidence at or above which a measurement is trusted
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    pub threshold: f64,

    /// Statistic used to impute untrusted translations
    #[arg(long, value_enum, default_value_t = Estimator::default())]
    pub estimator: Estimator,

    /// Trusted samples a row or column needs for its own estimate
    #[arg(long, default_value_t = DEFAULT_MIN_SAMPLES)]
    pub min_samples: usize,

    /// Repair trusted translations further than this from their estimate
    #[arg(long)]
    pub outlier_tolerance: Option<i64>,

    /// Directory receiving the position and translation tables
    #[arg(short, long, default_value = "stitched")]
    pub output: PathBuf,

    /// Stitch a generated mosaic instead of files on disk
    #[arg(long)]
    pub synthetic: bool,

    /// Seed of the synthetic mosaic
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Side length of synthetic tiles in pixels
    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_TILE_SIZE)]
    pub tile_size: usize,

    /// Overlap of synthetic neighbours in percent
    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_OVERLAP_PERCENT)]
    pub synthetic_overlap: f64,

    /// Largest random displacement of a synthetic tile
    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_JITTER)]
    pub jitter: i64,

    /// Also write the synthetic tiles as PNG files into the output directory
    #[arg(long)]
    pub save_tiles: bool,

    /// Suppress progress bars and all logging below errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Increase logging detail; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log level selected by `--quiet` and `--verbose`
    pub const fn verbosity(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Check if progress should be displayed
    pub const fn should_show_progress(&self) -> bool {
        !self.quiet
    }

    /// Run configuration assembled from the flags
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the assembled configuration is invalid
    pub fn config(&self) -> Result<StitchConfig> {
        let config = StitchConfig {
            traversal: self.traversal,
            backend: self.backend,
            workers: self.workers,
            pool_capacity: self.pool_capacity,
            tile_shape: None,
            peak_candidates: self.peaks,
            overlap: OverlapBounds {
                min_percent: self.min_overlap,
                max_percent: self.max_overlap,
            },
            max_drift_percent: self.drift,
            min_overlap_pixels: DEFAULT_MIN_OVERLAP_PIXELS,
            confidence_threshold: self.threshold,
            repair: RepairPolicy {
                estimator: self.estimator,
                min_samples: self.min_samples,
                outlier_tolerance: self.outlier_tolerance,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Filename pattern selected by `--pattern`, `--sequential` and `--start`
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the template lacks its placeholders
    pub fn pattern(&self) -> Result<FilenamePattern> {
        let pattern = if self.sequential {
            FilenamePattern::Sequential {
                template: self.pattern.clone(),
                numbering: self.numbering,
                start: self.start,
            }
        } else {
            FilenamePattern::RowColumn {
                template: self.pattern.clone(),
                start: self.start,
            }
        };
        pattern.validate()?;
        Ok(pattern)
    }

    fn synthetic_spec(&self) -> SyntheticSpec {
        let defaults = SyntheticSpec::default();
        SyntheticSpec {
            rows: self.rows.unwrap_or(defaults.rows),
            cols: self.cols.unwrap_or(defaults.cols),
            tile_height: self.tile_size,
            tile_width: self.tile_size,
            overlap_percent: self.synthetic_overlap,
            jitter: self.jitter,
            seed: self.seed,
        }
    }
}

/// Runs one stitching job described by the command line
pub struct StitchCommand {
    cli: Cli,
}

impl StitchCommand {
    /// Create a command from parsed arguments
    pub const fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Stitch, then write positions and translations to the output directory
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, stitching fails
    /// fatally, or the output cannot be written
    pub fn run(&self) -> Result<()> {
        let start_time = Instant::now();
        let mut config = self.cli.config()?;

        let (grid, source, expected): (TileGrid, Box<dyn ImageSource>, _) = if self.cli.synthetic {
            let mosaic = self.cli.synthetic_spec().generate()?;
            if self.cli.save_tiles {
                mosaic.save(&self.cli.output.join("tiles"))?;
            }
            config.tile_shape = Some(mosaic.tile_shape);
            let expected = mosaic.expected_layout();
            let source: Box<dyn ImageSource> = Box::new(mosaic.source);
            (mosaic.grid, source, Some(expected))
        } else {
            let target = self.cli.target.clone().ok_or_else(|| {
                invalid_parameter("target", &"<none>", &"a tile directory is required")
            })?;
            if !target.is_dir() {
                return Err(invalid_parameter(
                    "target",
                    &target.display(),
                    &"must be a directory of tile images",
                ));
            }
            let (Some(rows), Some(cols)) = (self.cli.rows, self.cli.cols) else {
                return Err(invalid_parameter(
                    "rows",
                    &"<none>",
                    &"grid dimensions are required for directory input",
                ));
            };
            let grid = TileGrid::from_pattern(rows, cols, &self.cli.pattern()?)?;
            let source: Box<dyn ImageSource> = Box::new(DirectorySource::new(target));
            (grid, source, None)
        };

        let stitcher = Stitcher::new(config)?;
        let progress: Box<dyn PipelineProgress> = if self.cli.should_show_progress() {
            Box::new(ProgressManager::new())
        } else {
            Box::new(NoProgress)
        };
        let result = stitcher.stitch(&grid, source.as_ref(), progress.as_ref())?;

        if let Some(expected) = expected {
            let misplaced = result
                .layout
                .offsets()
                .iter()
                .zip(expected.iter())
                .filter(|(found, truth)| found != truth)
                .count();
            log::info!(
                "Synthetic mosaic: {misplaced} of {} tile(s) differ from their true position",
                expected.len()
            );
        }

        self.write_outputs(&result)?;
        log::info!(
            "Finished in {:.2?}, output in '{}'",
            start_time.elapsed(),
            self.cli.output.display()
        );
        Ok(())
    }

    fn write_outputs(&self, result: &StitchResult) -> Result<()> {
        let output = &self.cli.output;
        std::fs::create_dir_all(output).map_err(|source| StitchError::FileSystem {
            path: output.clone(),
            operation: "create directory",
            source,
        })?;
        write_positions(&output.join(POSITIONS_FILE), &result.layout)?;
        write_translations(&output.join(TRANSLATIONS_FILE), &result.correlations)?;

        let report = &result.report;
        if !report.is_clean() {
            log::warn!(
                "{} failed tile(s), {} invalid pair(s), {} repaired pair(s), {} outlier(s)",
                report.failed_tiles.len(),
                report.invalid_pairs.len(),
                report.repaired_pairs.len(),
                report.outliers.len()
            );
        }
        Ok(())
    }
}
