//! Repeatability statistics over trusted pairwise translations
//!
//! Adjacent tiles in a regular scan are offset by nearly the same amount
//! everywhere. West pairs are summarized per row and north pairs per
//! column, and both per direction. A line whose estimate strays from its
//! direction, or that has too few trusted pairs, is degenerate and is
//! repaired from the direction-wide estimate instead of its own.

use std::collections::BTreeSet;

use crate::algorithm::correlation::{PairId, PairwiseCorrelation, Translation};
use crate::io::configuration::RepairPolicy;
use crate::math::statistics::{Estimator, half_range};
use crate::spatial::grid::Direction;

/// Summary of trusted translations along one row or column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineStats {
    /// Row index for west pairs, column index for north pairs
    pub line: usize,
    /// Adjacent pairs in the line
    pub pairs: usize,
    /// Trusted translations in the line
    pub samples: usize,
    /// Estimator value over those translations
    pub estimate: Option<Translation>,
    /// `ceil((max - min) / 2)` over both axes
    pub repeatability: i64,
    /// Whether the line should not be repaired from its own estimate
    pub degenerate: bool,
}

/// Summary of trusted translations in one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionStats {
    /// North or west
    pub direction: Direction,
    /// Estimator value over every trusted translation
    pub estimate: Option<Translation>,
    /// Trusted translations used
    pub samples: usize,
    /// `ceil((max - min) / 2)` over both axes
    pub repeatability: i64,
    /// Per-line statistics, indexed by line
    pub lines: Vec<LineStats>,
}

impl DirectionStats {
    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            estimate: None,
            samples: 0,
            repeatability: 0,
            lines: Vec::new(),
        }
    }

    /// Lines flagged degenerate
    pub fn degenerate_lines(&self) -> Vec<usize> {
        self.lines
            .iter()
            .filter(|line| line.degenerate)
            .map(|line| line.line)
            .collect()
    }
}

/// Repeatability of both measured directions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatabilityStats {
    /// Statistics of north pairs, per column
    pub north: DirectionStats,
    /// Statistics of west pairs, per row
    pub west: DirectionStats,
    /// Trusted translations excluded as outliers
    pub outliers: Vec<PairId>,
    min_samples: usize,
}

impl RepeatabilityStats {
    /// Gather statistics for a `rows x cols` grid
    ///
    /// A translation counts when it is valid and its confidence reaches
    /// `threshold`. With an outlier tolerance, translations further than the
    /// tolerance from the sample nearest the first direction estimate are
    /// dropped and the estimate is taken again, unless fewer than
    /// `min_samples` translations would remain.
    pub fn gather(
        rows: usize,
        cols: usize,
        correlations: &[PairwiseCorrelation],
        threshold: f64,
        policy: &RepairPolicy,
    ) -> Self {
        let mut outliers = Vec::new();
        let north = direction_stats(
            Direction::North,
            cols,
            rows.saturating_sub(1),
            correlations,
            threshold,
            policy,
            &mut outliers,
        );
        let west = direction_stats(
            Direction::West,
            rows,
            cols.saturating_sub(1),
            correlations,
            threshold,
            policy,
            &mut outliers,
        );
        outliers.sort_unstable();

        Self {
            north,
            west,
            outliers,
            min_samples: policy.min_samples,
        }
    }

    /// Statistics of a measured direction; `None` for south and east
    pub const fn direction(&self, direction: Direction) -> Option<&DirectionStats> {
        match direction {
            Direction::North => Some(&self.north),
            Direction::West => Some(&self.west),
            Direction::South | Direction::East => None,
        }
    }

    /// Replacement for an untrusted translation in `direction` on `line`
    ///
    /// The line's own estimate when it is healthy, otherwise the direction
    /// estimate when that has enough samples.
    pub fn repair_estimate(&self, direction: Direction, line: usize) -> Option<Translation> {
        let stats = self.direction(direction)?;

        let own = stats
            .lines
            .get(line)
            .filter(|own| !own.degenerate && own.samples >= self.min_samples)
            .and_then(|own| own.estimate);

        own.or_else(|| {
            (stats.samples >= self.min_samples)
                .then_some(stats.estimate)
                .flatten()
        })
    }

    /// Rows whose west pairs are degenerate
    pub fn degenerate_rows(&self) -> Vec<usize> {
        self.west.degenerate_lines()
    }

    /// Columns whose north pairs are degenerate
    pub fn degenerate_columns(&self) -> Vec<usize> {
        self.north.degenerate_lines()
    }

    /// Whether a trusted translation was excluded as an outlier
    pub fn is_outlier(&self, id: PairId) -> bool {
        self.outliers.binary_search(&id).is_ok()
    }
}

/// Line a pair belongs to: its row for west pairs, its column for north
pub const fn line_of(id: PairId) -> usize {
    match id.direction {
        Direction::West | Direction::East => id.tile.row,
        Direction::North | Direction::South => id.tile.col,
    }
}

fn direction_stats(
    direction: Direction,
    line_count: usize,
    pairs_per_line: usize,
    correlations: &[PairwiseCorrelation],
    threshold: f64,
    policy: &RepairPolicy,
    outliers: &mut Vec<PairId>,
) -> DirectionStats {
    if pairs_per_line == 0 {
        return DirectionStats::empty(direction);
    }

    let mut trusted: Vec<&PairwiseCorrelation> = correlations
        .iter()
        .filter(|c| c.direction == direction && c.is_trusted(threshold))
        .collect();

    if let Some(tolerance) = policy.outlier_tolerance
        && let Some(reference) = reference_sample(policy.estimator, &trusted)
    {
        let excluded: BTreeSet<PairId> = trusted
            .iter()
            .filter(|c| c.translation.chebyshev(reference) > tolerance)
            .map(|c| c.id())
            .collect();
        let remaining = trusted.len() - excluded.len();
        if remaining >= policy.min_samples.max(1) {
            for id in &excluded {
                log::debug!("Translation of {id} is an outlier");
            }
            trusted.retain(|c| !excluded.contains(&c.id()));
            outliers.extend(excluded);
        } else {
            log::debug!(
                "Keeping {} {} outlier(s), only {remaining} sample(s) would remain",
                excluded.len(),
                direction.name()
            );
        }
    }

    let direction_estimate = estimate(policy.estimator, &trusted);
    let repeatability = spread(&trusted);
    let allowed = repeatability.max(1);

    let lines = (0..line_count)
        .map(|line| {
            let members: Vec<&PairwiseCorrelation> = trusted
                .iter()
                .copied()
                .filter(|c| line_of(c.id()) == line)
                .collect();
            let line_estimate = estimate(policy.estimator, &members);
            let strays = match (line_estimate, direction_estimate) {
                (Some(own), Some(overall)) => own.chebyshev(overall) > allowed,
                _ => false,
            };

            LineStats {
                line,
                pairs: pairs_per_line,
                samples: members.len(),
                estimate: line_estimate,
                repeatability: spread(&members),
                degenerate: members.len() < policy.min_samples || strays,
            }
        })
        .collect();

    DirectionStats {
        direction,
        estimate: direction_estimate,
        samples: trusted.len(),
        repeatability,
        lines,
    }
}

fn estimate(estimator: Estimator, samples: &[&PairwiseCorrelation]) -> Option<Translation> {
    let dx: Vec<i64> = samples.iter().map(|c| c.translation.dx).collect();
    let dy: Vec<i64> = samples.iter().map(|c| c.translation.dy).collect();
    Some(Translation::new(
        estimator.estimate(&dx)?,
        estimator.estimate(&dy)?,
    ))
}

/// The sample nearest the estimator value, ties to the smallest `(dx, dy)`
///
/// Per-axis estimates need not coincide with any sample, so outliers are
/// measured against a translation that was actually observed.
fn reference_sample(
    estimator: Estimator,
    samples: &[&PairwiseCorrelation],
) -> Option<Translation> {
    let center = estimate(estimator, samples)?;
    samples
        .iter()
        .map(|c| c.translation)
        .min_by_key(|t| (t.chebyshev(center), t.dx, t.dy))
}

fn spread(samples: &[&PairwiseCorrelation]) -> i64 {
    let dx: Vec<i64> = samples.iter().map(|c| c.translation.dx).collect();
    let dy: Vec<i64> = samples.iter().map(|c| c.translation.dy).collect();
    half_range(&dx)
        .unwrap_or_default()
        .max(half_range(&dy).unwrap_or_default())
}
