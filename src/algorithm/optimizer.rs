//! Global optimization of pairwise translations into one grid layout
//!
//! Trusted measurements are kept as they are. Every other pair gets the
//! repeatability estimate of its row or column, falling back to its
//! direction, and is marked repaired. Absolute offsets are then composed
//! over a maximum spanning tree of the adjacency graph, so each tile hangs
//! off its most reliable link. Measured links always outrank repaired ones,
//! then higher confidence, then earlier traversal rank. Finally the layout
//! is shifted so tile (0, 0) sits at the origin.

use ndarray::Array2;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::algorithm::correlation::{PairId, PairwiseCorrelation, Translation};
use crate::analysis::repeatability::{RepeatabilityStats, line_of};
use crate::io::configuration::{RepairPolicy, StitchConfig};
use crate::io::error::{Result, StitchError};
use crate::spatial::grid::{Direction, GridPosition};
use crate::spatial::traversal::Traversal;

/// Where a tile's offset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OffsetSource {
    /// The tile the layout was grown from
    Anchor,
    /// Linked through an imputed translation
    Repaired,
    /// Linked through a trusted measurement
    Measured,
}

impl OffsetSource {
    /// Lower-case name for messages and exports
    pub const fn name(self) -> &'static str {
        match self {
            Self::Anchor => "anchor",
            Self::Repaired => "repaired",
            Self::Measured => "measured",
        }
    }
}

/// Absolute placement of one tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedTile {
    /// Grid position of the tile
    pub position: GridPosition,
    /// Tile origin relative to tile (0, 0)
    pub offset: Translation,
    /// Kind of link that placed the tile
    pub source: OffsetSource,
    /// Confidence of that link; zero for repaired links
    pub confidence: f64,
}

/// Final absolute offsets of every tile
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    placements: Array2<PlacedTile>,
}

impl GridLayout {
    /// Grid dimensions (rows, cols)
    pub fn dimensions(&self) -> (usize, usize) {
        self.placements.dim()
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.placements.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.placements.ncols()
    }

    /// Placement of one tile
    pub fn get(&self, position: GridPosition) -> Option<&PlacedTile> {
        self.placements.get([position.row, position.col])
    }

    /// Offset of one tile
    pub fn offset(&self, position: GridPosition) -> Option<Translation> {
        self.get(position).map(|placed| placed.offset)
    }

    /// All offsets, indexed by `[row, col]`
    pub fn offsets(&self) -> Array2<Translation> {
        self.placements.mapv(|placed| placed.offset)
    }

    /// Placements in row-major order
    pub fn iter(&self) -> impl Iterator<Item = &PlacedTile> {
        self.placements.iter()
    }

    /// Tiles placed through an imputed translation
    pub fn repaired_count(&self) -> usize {
        self.iter()
            .filter(|placed| placed.source == OffsetSource::Repaired)
            .count()
    }

    /// Smallest and largest offset over all tiles
    pub fn extent(&self) -> (Translation, Translation) {
        self.iter().fold(
            (Translation::default(), Translation::default()),
            |(low, high), placed| {
                let at = placed.offset;
                (
                    Translation::new(low.dx.min(at.dx), low.dy.min(at.dy)),
                    Translation::new(high.dx.max(at.dx), high.dy.max(at.dy)),
                )
            },
        )
    }

    /// Every adjacent pair re-expressed as a fully confident measurement
    ///
    /// Optimizing these reproduces the layout.
    pub fn as_measurements(&self) -> Vec<PairwiseCorrelation> {
        let (rows, cols) = self.dimensions();
        let mut measurements = Vec::with_capacity(rows * cols * 2);

        for placed in self.iter() {
            for direction in Direction::MEASURED {
                let Some(neighbor) = placed.position.neighbor(direction, rows, cols) else {
                    continue;
                };
                let Some(other) = self.offset(neighbor) else {
                    continue;
                };
                measurements.push(PairwiseCorrelation::measured(
                    placed.position,
                    neighbor,
                    direction,
                    placed.offset - other,
                    1.0,
                ));
            }
        }
        measurements
    }
}

/// What the optimizer did besides placing tiles
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerReport {
    /// Repeatability statistics the repairs were drawn from
    pub stats: RepeatabilityStats,
    /// Pairs whose translation was imputed
    pub repaired_pairs: Vec<PairId>,
    /// Pairs without a valid measurement
    pub invalid_pairs: Vec<PairId>,
    /// Tile the layout was grown from
    pub root: GridPosition,
}

/// A usable link between two adjacent tiles
#[derive(Debug, Clone, Copy)]
struct Link {
    /// Tile whose origin the translation measures
    tile: GridPosition,
    /// Neighbour it is measured against
    neighbor: GridPosition,
    /// Tile origin minus neighbour origin
    translation: Translation,
    source: OffsetSource,
    confidence: f64,
}

impl Link {
    /// The far end of the link seen from `from`, and its offset
    fn follow(&self, from: GridPosition, offset: Translation) -> (GridPosition, Translation) {
        if from == self.neighbor {
            (self.tile, offset + self.translation)
        } else {
            (self.neighbor, offset - self.translation)
        }
    }
}

/// Heap entry: a link leading out of the placed set
struct Frontier {
    link: Link,
    from: GridPosition,
    to: GridPosition,
    to_rank: usize,
}

impl Frontier {
    fn key(&self) -> (OffsetSource, f64, Reverse<usize>) {
        (self.link.source, self.link.confidence, Reverse(self.to_rank))
    }
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        let (source, confidence, rank) = self.key();
        let (other_source, other_confidence, other_rank) = other.key();
        source
            .cmp(&other_source)
            .then_with(|| confidence.total_cmp(&other_confidence))
            .then_with(|| rank.cmp(&other_rank))
            .then_with(|| other.from.cmp(&self.from))
    }
}

/// Turns pairwise correlations into a consistent [`GridLayout`]
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOptimizer {
    threshold: f64,
    policy: RepairPolicy,
    traversal: Traversal,
}

impl GlobalOptimizer {
    /// Create an optimizer
    pub const fn new(threshold: f64, policy: RepairPolicy, traversal: Traversal) -> Self {
        Self {
            threshold,
            policy,
            traversal,
        }
    }

    /// Optimizer using the thresholds and repair policy of a configuration
    pub const fn from_config(config: &StitchConfig) -> Self {
        Self::new(config.confidence_threshold, config.repair, config.traversal)
    }

    /// Place every tile of a `rows x cols` grid
    ///
    /// Pairs missing from `correlations` count as invalid.
    ///
    /// # Errors
    ///
    /// Returns `EmptyGrid` for a zero dimension, or `GlobalOptimization`
    /// naming every tile that no measured or repaired link reaches
    pub fn optimize(
        &self,
        rows: usize,
        cols: usize,
        correlations: &[PairwiseCorrelation],
    ) -> Result<(GridLayout, OptimizerReport)> {
        if rows == 0 || cols == 0 {
            return Err(StitchError::EmptyGrid { rows, cols });
        }

        let measured = Self::index_pairs(rows, cols, correlations);
        let stats = self.gather_stats(rows, cols, correlations, &measured);

        let mut links: HashMap<GridPosition, Vec<Link>> = HashMap::new();
        let mut repaired_pairs = Vec::new();
        let mut invalid_pairs = Vec::new();

        for row in 0..rows {
            for col in 0..cols {
                let tile = GridPosition::new(row, col);
                for direction in Direction::MEASURED {
                    let Some(neighbor) = tile.neighbor(direction, rows, cols) else {
                        continue;
                    };
                    let id = PairId { tile, direction };
                    let found = measured.get(&id);

                    if found.is_none_or(|c| !c.is_valid()) {
                        invalid_pairs.push(id);
                    }

                    let link = match found {
                        Some(c) if c.is_trusted(self.threshold) && !stats.is_outlier(id) => {
                            Some(Link {
                                tile,
                                neighbor,
                                translation: c.translation,
                                source: OffsetSource::Measured,
                                confidence: c.confidence,
                            })
                        }
                        _ => stats
                            .repair_estimate(direction, line_of(id))
                            .map(|translation| {
                                repaired_pairs.push(id);
                                Link {
                                    tile,
                                    neighbor,
                                    translation,
                                    source: OffsetSource::Repaired,
                                    confidence: 0.0,
                                }
                            }),
                    };

                    if let Some(link) = link {
                        links.entry(tile).or_default().push(link);
                        links.entry(neighbor).or_default().push(link);
                    }
                }
            }
        }

        let root = self
            .traversal
            .iter(rows, cols)
            .find(|position| links.contains_key(position))
            .unwrap_or_default();

        let placements = self.grow(rows, cols, root, &links)?;

        log::info!(
            "Layout resolved from {root}: {} repaired pair(s), {} invalid pair(s)",
            repaired_pairs.len(),
            invalid_pairs.len()
        );
        let degenerate_rows = stats.degenerate_rows();
        let degenerate_columns = stats.degenerate_columns();
        if !degenerate_rows.is_empty() || !degenerate_columns.is_empty() {
            log::warn!(
                "Degenerate rows {degenerate_rows:?} and columns {degenerate_columns:?} were repaired from direction estimates"
            );
        }

        Ok((
            GridLayout { placements },
            OptimizerReport {
                stats,
                repaired_pairs,
                invalid_pairs,
                root,
            },
        ))
    }

    /// Repeatability statistics, without outlier exclusion when excluding
    /// would split tiles that trusted measurements join
    ///
    /// Consistent measurements then always reproduce their own layout.
    fn gather_stats(
        &self,
        rows: usize,
        cols: usize,
        correlations: &[PairwiseCorrelation],
        measured: &HashMap<PairId, &PairwiseCorrelation>,
    ) -> RepeatabilityStats {
        let stats =
            RepeatabilityStats::gather(rows, cols, correlations, self.threshold, &self.policy);
        if stats.outliers.is_empty() {
            return stats;
        }

        let trusted = component_count(rows, cols, measured, |_, c| c.is_trusted(self.threshold));
        let kept = component_count(rows, cols, measured, |id, c| {
            c.is_trusted(self.threshold) && !stats.is_outlier(id)
        });
        if kept == trusted {
            return stats;
        }

        log::debug!(
            "Keeping {} outlier(s): excluding them splits the trusted measurements into {kept} groups",
            stats.outliers.len()
        );
        let lenient = RepairPolicy {
            outlier_tolerance: None,
            ..self.policy
        };
        RepeatabilityStats::gather(rows, cols, correlations, self.threshold, &lenient)
    }

    /// First correlation per in-grid pair, keyed by pair
    fn index_pairs<'c>(
        rows: usize,
        cols: usize,
        correlations: &'c [PairwiseCorrelation],
    ) -> HashMap<PairId, &'c PairwiseCorrelation> {
        let mut measured = HashMap::with_capacity(correlations.len());
        for correlation in correlations {
            let expected = correlation
                .tile
                .neighbor(correlation.direction, rows, cols);
            if !correlation.direction.is_measured() || expected != Some(correlation.neighbor) {
                log::debug!(
                    "Ignoring correlation of {} against {} outside the {rows}x{cols} grid",
                    correlation.tile,
                    correlation.neighbor
                );
                continue;
            }
            measured.entry(correlation.id()).or_insert(correlation);
        }
        measured
    }

    /// Prim's algorithm over the links, maximizing link priority
    fn grow(
        &self,
        rows: usize,
        cols: usize,
        root: GridPosition,
        links: &HashMap<GridPosition, Vec<Link>>,
    ) -> Result<Array2<PlacedTile>> {
        let unplaced = |position: GridPosition| PlacedTile {
            position,
            offset: Translation::default(),
            source: OffsetSource::Anchor,
            confidence: 0.0,
        };
        let mut placements =
            Array2::from_shape_fn((rows, cols), |(row, col)| unplaced(GridPosition::new(row, col)));
        let mut placed = Array2::from_elem((rows, cols), false);

        let rank = |position: GridPosition| {
            self.traversal
                .rank_of(position, rows, cols)
                .unwrap_or(usize::MAX)
        };
        let mut frontier = BinaryHeap::new();
        let expand = |from: GridPosition, offset: Translation, frontier: &mut BinaryHeap<Frontier>| {
            for link in links.get(&from).into_iter().flatten() {
                let (to, _) = link.follow(from, offset);
                frontier.push(Frontier {
                    link: *link,
                    from,
                    to,
                    to_rank: rank(to),
                });
            }
        };

        if let Some(anchor) = placements.get_mut([root.row, root.col]) {
            anchor.confidence = 1.0;
        }
        if let Some(flag) = placed.get_mut([root.row, root.col]) {
            *flag = true;
        }
        expand(root, Translation::default(), &mut frontier);

        while let Some(Frontier { link, from, to, .. }) = frontier.pop() {
            if placed.get([to.row, to.col]).copied().unwrap_or(true) {
                continue;
            }
            let origin = placements
                .get([from.row, from.col])
                .map(|p| p.offset)
                .unwrap_or_default();
            let (_, offset) = link.follow(from, origin);

            if let Some(slot) = placements.get_mut([to.row, to.col]) {
                *slot = PlacedTile {
                    position: to,
                    offset,
                    source: link.source,
                    confidence: link.confidence,
                };
            }
            if let Some(flag) = placed.get_mut([to.row, to.col]) {
                *flag = true;
            }
            expand(to, offset, &mut frontier);
        }

        let unresolved: Vec<GridPosition> = placed
            .indexed_iter()
            .filter(|&(_, &done)| !done)
            .map(|((row, col), _)| GridPosition::new(row, col))
            .collect();
        if !unresolved.is_empty() {
            return Err(StitchError::GlobalOptimization { unresolved });
        }

        let origin = placements
            .get([0, 0])
            .map(|p| p.offset)
            .unwrap_or_default();
        placements.map_inplace(|p| p.offset = p.offset - origin);
        Ok(placements)
    }
}

/// Groups of tiles joined by the pairs `keep` accepts
fn component_count<F>(
    rows: usize,
    cols: usize,
    measured: &HashMap<PairId, &PairwiseCorrelation>,
    keep: F,
) -> usize
where
    F: Fn(PairId, &PairwiseCorrelation) -> bool,
{
    let mut adjacent: HashMap<GridPosition, Vec<GridPosition>> = HashMap::new();
    for (&id, &correlation) in measured {
        if keep(id, correlation) {
            adjacent
                .entry(correlation.tile)
                .or_default()
                .push(correlation.neighbor);
            adjacent
                .entry(correlation.neighbor)
                .or_default()
                .push(correlation.tile);
        }
    }

    let mut seen = HashSet::new();
    let mut groups = 0;
    for row in 0..rows {
        for col in 0..cols {
            let start = GridPosition::new(row, col);
            if !seen.insert(start) {
                continue;
            }
            groups += 1;
            let mut stack = vec![start];
            while let Some(at) = stack.pop() {
                for &next in adjacent.get(&at).into_iter().flatten() {
                    if seen.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }
    }
    groups
}
