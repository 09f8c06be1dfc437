//! Peak extraction from correlation surfaces

use ndarray::Array2;
use std::cmp::Ordering;

/// One local maximum candidate of a correlation surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCandidate {
    /// Row-major flattened index into the surface
    pub index: usize,
    /// Surface value at that index
    pub value: f64,
}

impl PeakCandidate {
    /// `(row, col)` of the candidate in a surface `width` columns wide
    pub const fn row_col(&self, width: usize) -> (usize, usize) {
        if width == 0 {
            return (0, 0);
        }
        (self.index / width, self.index % width)
    }
}

/// Ranking order: larger value first, then smaller index
pub fn compare_candidates(a: &PeakCandidate, b: &PeakCandidate) -> Ordering {
    b.value
        .total_cmp(&a.value)
        .then_with(|| a.index.cmp(&b.index))
}

/// The `k` highest values of `surface`, ranked by [`compare_candidates`]
///
/// Non-finite values are never candidates.
pub fn top_peaks(surface: &Array2<f64>, k: usize) -> Vec<PeakCandidate> {
    if k == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<PeakCandidate> = Vec::with_capacity(k + 1);
    for (index, &value) in surface.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        let candidate = PeakCandidate { index, value };

        if ranked.len() == k
            && ranked
                .last()
                .is_some_and(|worst| compare_candidates(&candidate, worst) != Ordering::Less)
        {
            continue;
        }

        let at = ranked
            .binary_search_by(|held| compare_candidates(held, &candidate))
            .unwrap_or_else(|insert| insert);
        ranked.insert(at, candidate);
        ranked.truncate(k);
    }

    ranked
}
