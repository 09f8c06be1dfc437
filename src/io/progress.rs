//! Progress reporting for stitching runs

use crate::algorithm::correlation::PairwiseCorrelation;
use crate::io::configuration::PROGRESS_BAR_WIDTH;
use crate::spatial::grid::GridPosition;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::LazyLock;

/// Observer of pipeline progress
///
/// Called only from the thread that runs the pipeline. Every method
/// defaults to doing nothing.
pub trait PipelineProgress {
    /// The run is about to start
    fn started(&self, _tiles: usize, _pairs: usize) {}

    /// A tile finished loading and transforming, or failed to
    fn tile_settled(&self, _position: GridPosition, _loaded: bool) {}

    /// A pair was correlated or recorded as invalid
    fn pair_resolved(&self, _correlation: &PairwiseCorrelation) {}

    /// Checkouts and returns across both buffer pools, once every task has
    /// let go of its tile; reported on every exit, aborts included
    fn pools_drained(&self, _acquisitions: u64, _releases: u64) {}

    /// The pipeline has stopped
    fn finished(&self) {}
}

/// Progress observer that reports nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl PipelineProgress for NoProgress {}

static TILE_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template(&format!(
            "{{prefix:>6}} [{{bar:{PROGRESS_BAR_WIDTH}.cyan/blue}}] {{pos}}/{{len}} {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
});

/// Terminal progress bars for tiles and pairs
pub struct ProgressManager {
    multi_progress: MultiProgress,
    tiles: ProgressBar,
    pairs: ProgressBar,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    /// Create the bars; lengths are set when a run starts
    pub fn new() -> Self {
        let multi_progress = MultiProgress::new();
        let tiles = multi_progress.add(Self::bar("tiles"));
        let pairs = multi_progress.add(Self::bar("pairs"));
        Self {
            multi_progress,
            tiles,
            pairs,
        }
    }

    fn bar(prefix: &'static str) -> ProgressBar {
        let bar = ProgressBar::new(0);
        bar.set_style(TILE_STYLE.clone());
        bar.set_prefix(prefix);
        bar
    }

    /// Settled tiles and resolved pairs counted so far
    pub fn positions(&self) -> (u64, u64) {
        (self.tiles.position(), self.pairs.position())
    }
}

impl PipelineProgress for ProgressManager {
    fn started(&self, tiles: usize, pairs: usize) {
        self.tiles.set_length(tiles as u64);
        self.pairs.set_length(pairs as u64);
    }

    fn tile_settled(&self, position: GridPosition, loaded: bool) {
        if !loaded {
            self.tiles.set_message(format!("{position} failed"));
        }
        self.tiles.inc(1);
    }

    fn pair_resolved(&self, _correlation: &PairwiseCorrelation) {
        self.pairs.inc(1);
    }

    fn finished(&self) {
        self.tiles.finish();
        self.pairs.finish();
        let _ = self.multi_progress.clear();
    }
}
