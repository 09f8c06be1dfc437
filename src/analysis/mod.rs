//! Statistical analysis of pairwise measurements

/// Per-direction and per-line repeatability of trusted translations
pub mod repeatability;
