//! Phase correlation between neighbouring tiles
//!
//! The normalized cross-power spectrum of two tiles is inverted into a
//! correlation surface whose highest peaks mark candidate shifts. Each peak is
//! ambiguous under circular wraparound, so it expands to four signed
//! translations; those outside the expected overlap are discarded and the
//! rest are scored by normalized cross-correlation over the overlap they
//! imply.
//!
//! Translations give the tile's origin relative to its neighbour's origin:
//! a tile's west neighbour sits at roughly `(-width, 0)` from it, so the
//! measured translation is roughly `(width - overlap, 0)`.

use ndarray::s;
use std::fmt;
use std::ops::{Add, Neg, RangeInclusive, Sub};

use crate::algorithm::backend::ComputeBackend;
use crate::algorithm::peaks::{PeakCandidate, top_peaks};
use crate::io::configuration::{CROSS_POWER_EPSILON, OverlapBounds, StitchConfig};
use crate::io::error::{Result, StitchError};
use crate::memory::pool::{PixelBuffer, SpectrumBuffer};
use crate::spatial::grid::{Direction, GridPosition};
use crate::spatial::tiles::Tile;

/// Whole-pixel offset between two tile origins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Translation {
    /// Horizontal offset, positive to the right
    pub dx: i64,
    /// Vertical offset, positive downwards
    pub dy: i64,
}

impl Translation {
    /// Create a translation
    pub const fn new(dx: i64, dy: i64) -> Self {
        Self { dx, dy }
    }

    /// Largest absolute per-axis difference to `other`
    pub const fn chebyshev(self, other: Self) -> i64 {
        let dx = (self.dx - other.dx).abs();
        let dy = (self.dy - other.dy).abs();
        if dx > dy { dx } else { dy }
    }
}

impl Add for Translation {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.dx + rhs.dx, self.dy + rhs.dy)
    }
}

impl Sub for Translation {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.dx - rhs.dx, self.dy - rhs.dy)
    }
}

impl Neg for Translation {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.dx, -self.dy)
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:+}, {:+})", self.dx, self.dy)
    }
}

/// Outcome class of one pairwise correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationQuality {
    /// A candidate satisfied the bound and was scored
    Measured,
    /// Every candidate fell outside the bound
    NoFeasiblePeak,
    /// One of the two tiles failed before it was transformed
    MissingOperand,
}

impl CorrelationQuality {
    /// Lower-case name for messages and exports
    pub const fn name(self) -> &'static str {
        match self {
            Self::Measured => "measured",
            Self::NoFeasiblePeak => "no-feasible-peak",
            Self::MissingOperand => "missing-operand",
        }
    }
}

/// Identity of an adjacent pair: a tile and the measured direction of its
/// neighbour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairId {
    /// The tile the translation belongs to
    pub tile: GridPosition,
    /// North or west
    pub direction: Direction,
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tile, self.direction.name())
    }
}

/// Translation of a tile relative to its north or west neighbour
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseCorrelation {
    /// The tile whose origin is measured
    pub tile: GridPosition,
    /// The neighbour it is measured against
    pub neighbor: GridPosition,
    /// Where the neighbour lies, north or west
    pub direction: Direction,
    /// Tile origin minus neighbour origin
    pub translation: Translation,
    /// Normalized cross-correlation of the overlap, zero when invalid
    pub confidence: f64,
    /// Whether the translation was measured at all
    pub quality: CorrelationQuality,
}

impl PairwiseCorrelation {
    /// A successful measurement
    pub const fn measured(
        tile: GridPosition,
        neighbor: GridPosition,
        direction: Direction,
        translation: Translation,
        confidence: f64,
    ) -> Self {
        Self {
            tile,
            neighbor,
            direction,
            translation,
            confidence,
            quality: CorrelationQuality::Measured,
        }
    }

    /// A pair without a usable translation
    pub fn invalid(
        tile: GridPosition,
        neighbor: GridPosition,
        direction: Direction,
        quality: CorrelationQuality,
    ) -> Self {
        Self {
            tile,
            neighbor,
            direction,
            translation: Translation::default(),
            confidence: 0.0,
            quality,
        }
    }

    /// Identity of the pair
    pub const fn id(&self) -> PairId {
        PairId {
            tile: self.tile,
            direction: self.direction,
        }
    }

    /// Whether a translation was measured
    pub fn is_valid(&self) -> bool {
        self.quality == CorrelationQuality::Measured
    }

    /// Whether the measurement is valid and confident enough to use as is
    pub fn is_trusted(&self, threshold: f64) -> bool {
        self.is_valid() && self.confidence >= threshold
    }
}

/// Feasible translations for one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationBound {
    /// Accepted horizontal offsets
    pub dx: RangeInclusive<i64>,
    /// Accepted vertical offsets
    pub dy: RangeInclusive<i64>,
}

impl TranslationBound {
    /// Any shift that leaves some overlap
    pub fn unbounded(shape: (usize, usize)) -> Self {
        let (height, width) = signed_shape(shape);
        Self {
            dx: -(width - 1)..=width - 1,
            dy: -(height - 1)..=height - 1,
        }
    }

    /// Bound for a neighbour lying in `direction` from the tile
    ///
    /// Along the pair axis the offset is the tile length minus an overlap
    /// within `overlap`; across it, at most `max_drift_percent` of the tile.
    pub fn for_direction(
        direction: Direction,
        shape: (usize, usize),
        overlap: OverlapBounds,
        max_drift_percent: f64,
    ) -> Self {
        let (height, width) = signed_shape(shape);
        let along = |length: i64| {
            let most = percent_floor(length, overlap.max_percent);
            let least = percent_ceil(length, overlap.min_percent);
            (length - most)..=(length - least)
        };
        let across = |length: i64| {
            let drift = percent_floor(length, max_drift_percent);
            -drift..=drift
        };
        let negate = |range: RangeInclusive<i64>| -*range.end()..=-*range.start();

        match direction {
            Direction::West => Self {
                dx: along(width),
                dy: across(height),
            },
            Direction::North => Self {
                dx: across(width),
                dy: along(height),
            },
            Direction::East => Self {
                dx: negate(along(width)),
                dy: across(height),
            },
            Direction::South => Self {
                dx: across(width),
                dy: negate(along(height)),
            },
        }
    }

    /// Whether `translation` lies inside the bound
    pub fn contains(&self, translation: Translation) -> bool {
        self.dx.contains(&translation.dx) && self.dy.contains(&translation.dy)
    }
}

fn signed_shape(shape: (usize, usize)) -> (i64, i64) {
    (
        i64::try_from(shape.0).unwrap_or(i64::MAX),
        i64::try_from(shape.1).unwrap_or(i64::MAX),
    )
}

fn percent_floor(length: i64, percent: f64) -> i64 {
    (length as f64 * percent / 100.0).floor() as i64
}

fn percent_ceil(length: i64, percent: f64) -> i64 {
    (length as f64 * percent / 100.0).ceil() as i64
}

/// Correlation settings derived from the run configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationParams {
    /// Peaks examined per pair
    pub peak_candidates: usize,
    /// Expected overlap between neighbours
    pub overlap: OverlapBounds,
    /// Largest perpendicular drift, in percent
    pub max_drift_percent: f64,
    /// Smallest overlap area scored, in pixels
    pub min_overlap_pixels: usize,
}

impl CorrelationParams {
    /// Extract the correlation settings of a configuration
    pub const fn from_config(config: &StitchConfig) -> Self {
        Self {
            peak_candidates: config.peak_candidates,
            overlap: config.overlap,
            max_drift_percent: config.max_drift_percent,
            min_overlap_pixels: config.min_overlap_pixels,
        }
    }

    /// Bound for a neighbour in `direction` of tiles shaped `shape`
    pub fn bound(&self, direction: Direction, shape: (usize, usize)) -> TranslationBound {
        TranslationBound::for_direction(direction, shape, self.overlap, self.max_drift_percent)
    }
}

/// Normalized cross-power spectrum `R·conj(M) / |R·conj(M)|`
///
/// Terms with negligible magnitude are set to zero.
pub fn cross_power_spectrum(reference: &SpectrumBuffer, moving: &SpectrumBuffer) -> SpectrumBuffer {
    let mut product = reference.clone();
    product.zip_mut_with(moving, |r, m| {
        let term = *r * m.conj();
        let magnitude = term.norm();
        *r = if magnitude < CROSS_POWER_EPSILON {
            Default::default()
        } else {
            term / magnitude
        };
    });
    product
}

/// Correlation surface peaks of `moving` against `reference`, best first
///
/// # Errors
///
/// Returns the backend's error if the inverse transform fails
pub fn rank_candidates<B>(
    backend: &B,
    reference: &SpectrumBuffer,
    moving: &SpectrumBuffer,
    peak_candidates: usize,
) -> Result<Vec<PeakCandidate>>
where
    B: ComputeBackend + ?Sized,
{
    let spectrum = cross_power_spectrum(reference, moving);
    let surface = backend.inverse_transform(&spectrum)?;
    Ok(top_peaks(&surface, peak_candidates))
}

/// The four signed shifts a peak at `index` can stand for
///
/// Ordered `(x, y)`, `(x - w, y)`, `(x, y - h)`, `(x - w, y - h)`.
pub fn interpretations(index: usize, shape: (usize, usize)) -> [Translation; 4] {
    let (height, width) = signed_shape(shape);
    let (row, col) = PeakCandidate { index, value: 0.0 }.row_col(shape.1);
    let x = i64::try_from(col).unwrap_or_default();
    let y = i64::try_from(row).unwrap_or_default();

    [
        Translation::new(x, y),
        Translation::new(x - width, y),
        Translation::new(x, y - height),
        Translation::new(x - width, y - height),
    ]
}

/// Normalized cross-correlation of the region two images share when
/// `moving`'s origin sits at `translation` from `reference`'s
///
/// `None` if the images differ in shape or the overlap is smaller than
/// `min_pixels`. Flat regions score zero.
pub fn overlap_ncc(
    reference: &PixelBuffer,
    moving: &PixelBuffer,
    translation: Translation,
    min_pixels: usize,
) -> Option<f64> {
    if reference.dim() != moving.dim() {
        return None;
    }
    let (height, width) = signed_shape(reference.dim());

    let x0 = translation.dx.max(0);
    let x1 = (width + translation.dx).min(width);
    let y0 = translation.dy.max(0);
    let y1 = (height + translation.dy).min(height);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let to_index = |value: i64| usize::try_from(value).ok();
    let (rx0, rx1, ry0, ry1) = (to_index(x0)?, to_index(x1)?, to_index(y0)?, to_index(y1)?);
    let (mx0, mx1) = (to_index(x0 - translation.dx)?, to_index(x1 - translation.dx)?);
    let (my0, my1) = (to_index(y0 - translation.dy)?, to_index(y1 - translation.dy)?);

    let area = (rx1 - rx0) * (ry1 - ry0);
    if area < min_pixels {
        return None;
    }

    let shared = reference.slice(s![ry0..ry1, rx0..rx1]);
    let other = moving.slice(s![my0..my1, mx0..mx1]);

    let count = area as f64;
    let mean_a = shared.sum() / count;
    let mean_b = other.sum() / count;

    let mut covariance = 0.0;
    let mut variance_a = 0.0;
    let mut variance_b = 0.0;
    for (&a, &b) in shared.iter().zip(other.iter()) {
        let da = a - mean_a;
        let db = b - mean_b;
        covariance += da * db;
        variance_a += da * da;
        variance_b += db * db;
    }

    let denominator = (variance_a * variance_b).sqrt();
    if denominator <= f64::EPSILON {
        return Some(0.0);
    }
    Some((covariance / denominator).clamp(-1.0, 1.0))
}

/// Best feasible translation among ranked candidates
///
/// Candidates are tried in rank order and their interpretations in the order
/// of [`interpretations`]; a later one only wins with a strictly higher
/// score. Without pixel data the score is the peak height.
pub fn resolve_translation(
    candidates: &[PeakCandidate],
    shape: (usize, usize),
    bound: &TranslationBound,
    pixels: Option<(&PixelBuffer, &PixelBuffer)>,
    min_overlap_pixels: usize,
) -> Option<(Translation, f64)> {
    let mut best: Option<(Translation, f64)> = None;

    for candidate in candidates {
        for translation in interpretations(candidate.index, shape) {
            if !bound.contains(translation) {
                continue;
            }
            let score = match pixels {
                Some((reference, moving)) => {
                    match overlap_ncc(reference, moving, translation, min_overlap_pixels) {
                        Some(score) => score,
                        None => continue,
                    }
                }
                None => candidate.value,
            };
            if !score.is_finite() {
                continue;
            }
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((translation, score));
            }
        }
    }

    best
}

/// Correlate `tile` against its neighbour in `direction`
///
/// Never fails: pairs without a feasible translation come back invalid
/// with zero confidence and a warning is logged.
pub fn correlate_tiles<B>(
    backend: &B,
    tile: &Tile,
    neighbor: &Tile,
    direction: Direction,
    params: &CorrelationParams,
) -> PairwiseCorrelation
where
    B: ComputeBackend + ?Sized,
{
    let (position, neighbor_position) = (tile.position(), neighbor.position());
    let invalid = |quality| {
        PairwiseCorrelation::invalid(position, neighbor_position, direction, quality)
    };

    let (Some(moving), Some(reference)) = (tile.spectrum(), neighbor.spectrum()) else {
        return invalid(CorrelationQuality::MissingOperand);
    };
    let shape = reference.dim();

    let rejected = |reason: String| {
        let error = StitchError::InvalidCorrelation {
            position,
            direction,
            reason,
        };
        log::warn!("{error}");
        invalid(CorrelationQuality::NoFeasiblePeak)
    };

    if moving.dim() != shape {
        return rejected(format!(
            "spectrum shapes differ: {:?} vs {:?}",
            moving.dim(),
            shape
        ));
    }

    let candidates = match rank_candidates(backend, reference, moving, params.peak_candidates) {
        Ok(candidates) => candidates,
        Err(error) => return rejected(error.to_string()),
    };

    let pixels = neighbor.pixels().zip(tile.pixels());
    let bound = params.bound(direction, shape);

    match resolve_translation(
        &candidates,
        shape,
        &bound,
        pixels,
        params.min_overlap_pixels,
    ) {
        Some((translation, confidence)) => {
            log::debug!(
                "Tile {position} {} of {neighbor_position}: {translation} at {confidence:.3}",
                direction.opposite().name()
            );
            PairwiseCorrelation::measured(
                position,
                neighbor_position,
                direction,
                translation,
                confidence,
            )
        }
        None => rejected(format!(
            "none of {} peak(s) lies within dx {:?}, dy {:?}",
            candidates.len(),
            bound.dx,
            bound.dy
        )),
    }
}

