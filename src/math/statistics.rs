//! Robust integer estimators for translation samples
//!
//! Translations are whole pixels, so every estimator here works on integers
//! and returns a value that actually occurs in the sample.

use num_traits::PrimInt;
use std::collections::HashMap;
use std::hash::Hash;

/// Statistic used to summarize a set of repeated translations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Estimator {
    /// Lower median of the samples
    #[default]
    Median,
    /// Most frequent sample
    Mode,
}

impl Estimator {
    /// Lower-case name for messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Mode => "mode",
        }
    }

    /// Apply the estimator, `None` for an empty sample
    pub fn estimate<T>(self, samples: &[T]) -> Option<T>
    where
        T: PrimInt + Hash,
    {
        match self {
            Self::Median => median(samples),
            Self::Mode => mode(samples),
        }
    }
}

/// Lower median: the element at index `(n - 1) / 2` after sorting
pub fn median<T: PrimInt>(samples: &[T]) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    sorted.get((sorted.len() - 1) / 2).copied()
}

/// Most frequent value
///
/// Ties go to the value closest to the median, then to the smaller value.
pub fn mode<T>(samples: &[T]) -> Option<T>
where
    T: PrimInt + Hash,
{
    let center = median(samples)?;

    let mut counts: HashMap<T, usize> = HashMap::new();
    for &sample in samples {
        *counts.entry(sample).or_default() += 1;
    }

    counts
        .into_iter()
        .min_by(|&(a, count_a), &(b, count_b)| {
            count_b
                .cmp(&count_a)
                .then_with(|| distance(a, center).cmp(&distance(b, center)))
                .then_with(|| a.cmp(&b))
        })
        .map(|(value, _)| value)
}

/// Repeatability of a sample: `ceil((max - min) / 2)`
pub fn half_range<T: PrimInt>(samples: &[T]) -> Option<T> {
    let min = samples.iter().copied().min()?;
    let max = samples.iter().copied().max()?;
    let spread = max - min;
    let two = T::one() + T::one();
    Some(spread / two + spread % two)
}

fn distance<T: PrimInt>(a: T, b: T) -> T {
    if a > b { a - b } else { b - a }
}
