//! Numeric building blocks for correlation and layout repair

/// Planned two-dimensional Fourier transforms
pub mod fft;
/// Integer estimators over repeated translation samples
pub mod statistics;
