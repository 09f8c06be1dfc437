//! Bounded buffer pools backing every pixel and spectrum array

/// Fixed-capacity pool with blocking, first-come first-served acquisition
pub mod pool;

pub use pool::{BufferPool, PixelBuffer, PooledBuffer, SpectrumBuffer};
