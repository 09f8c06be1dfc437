//! Tiles and their lifecycle through the pipeline
//!
//! A tile borrows one pixel buffer and one frequency-domain buffer from the
//! pools for as long as it is alive. Dropping the tile returns both, so every
//! exit path (success, load failure, transform failure, abort) gives the
//! buffers back exactly once.

use crate::algorithm::backend::ComputeBackend;
use crate::io::error::{Result, StitchError};
use crate::io::source::ImageSource;
use crate::memory::pool::{PixelBuffer, PooledBuffer, SpectrumBuffer};
use crate::spatial::grid::GridPosition;

/// Identity of a tile: where it sits and what the image source calls it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileDescriptor {
    /// Grid position of the tile
    pub position: GridPosition,
    /// Name the image source resolves (file name or key)
    pub source_name: String,
}

impl TileDescriptor {
    /// Create a descriptor
    pub const fn new(position: GridPosition, source_name: String) -> Self {
        Self {
            position,
            source_name,
        }
    }
}

/// Lifecycle state of a tile
///
/// `Unloaded → PixelsLoaded → Transformed → Released` is strictly ordered;
/// `Failed` is reachable from the first two and excludes the tile from
/// correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    /// Buffers acquired, pixels not yet read
    Unloaded,
    /// Pixel buffer filled by the image source
    PixelsLoaded,
    /// Frequency-domain representation computed
    Transformed,
    /// Buffers returned to the pools
    Released,
    /// Load or transform failed; buffers returned
    Failed,
}

impl TileState {
    /// Lower-case name for messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::PixelsLoaded => "pixels-loaded",
            Self::Transformed => "transformed",
            Self::Released => "released",
            Self::Failed => "failed",
        }
    }

    /// Whether the tile holds no buffers and will not change again
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Failed)
    }

    /// Whether the lifecycle permits moving to `next`
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unloaded, Self::PixelsLoaded)
                | (Self::PixelsLoaded, Self::Transformed)
                | (Self::Transformed, Self::Released)
                | (Self::Unloaded | Self::PixelsLoaded, Self::Failed)
        )
    }
}

/// One grid cell moving through the pipeline with its pooled buffers
#[derive(Debug)]
pub struct Tile {
    descriptor: TileDescriptor,
    state: TileState,
    pixels: Option<PooledBuffer<PixelBuffer>>,
    spectrum: Option<PooledBuffer<SpectrumBuffer>>,
}

impl Tile {
    /// Create an unloaded tile holding freshly acquired buffers
    pub fn new(
        descriptor: TileDescriptor,
        pixels: PooledBuffer<PixelBuffer>,
        spectrum: PooledBuffer<SpectrumBuffer>,
    ) -> Self {
        Self {
            descriptor,
            state: TileState::Unloaded,
            pixels: Some(pixels),
            spectrum: Some(spectrum),
        }
    }

    /// Grid position of the tile
    pub const fn position(&self) -> GridPosition {
        self.descriptor.position
    }

    /// Descriptor of the tile
    pub const fn descriptor(&self) -> &TileDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state
    pub const fn state(&self) -> TileState {
        self.state
    }

    /// Pixel data, once loaded
    pub fn pixels(&self) -> Option<&PixelBuffer> {
        match self.state {
            TileState::PixelsLoaded | TileState::Transformed => self.pixels.as_deref(),
            _ => None,
        }
    }

    /// Frequency-domain data, once transformed
    pub fn spectrum(&self) -> Option<&SpectrumBuffer> {
        match self.state {
            TileState::Transformed => self.spectrum.as_deref(),
            _ => None,
        }
    }

    /// Fill the pixel buffer from the image source
    ///
    /// On failure the tile moves to `Failed` and its buffers are returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the tile is not `Unloaded`, or the
    /// source's `LoadFailure`
    pub fn load(&mut self, source: &dyn ImageSource) -> Result<()> {
        self.check_transition(TileState::PixelsLoaded)?;

        let outcome = match self.pixels.as_deref_mut() {
            Some(pixels) => source.load_pixels(&self.descriptor, pixels),
            None => Err(missing_buffer(&self.descriptor, "pixel")),
        };

        match outcome {
            Ok(()) => {
                self.state = TileState::PixelsLoaded;
                Ok(())
            }
            Err(error) => {
                self.fail();
                Err(error)
            }
        }
    }

    /// Compute the forward transform into the frequency buffer
    ///
    /// On failure the tile moves to `Failed` and its buffers are returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the tile is not `PixelsLoaded`, or the
    /// backend's error
    pub fn transform<B>(&mut self, backend: &B) -> Result<()>
    where
        B: ComputeBackend + ?Sized,
    {
        self.check_transition(TileState::Transformed)?;

        let outcome = match (self.pixels.as_deref(), self.spectrum.as_deref_mut()) {
            (Some(pixels), Some(spectrum)) => backend.transform(pixels, spectrum),
            _ => Err(missing_buffer(&self.descriptor, "spectrum")),
        };

        match outcome {
            Ok(()) => {
                self.state = TileState::Transformed;
                Ok(())
            }
            Err(error) => {
                self.fail();
                Err(error)
            }
        }
    }

    /// Return both buffers once no pair needs them
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the tile is `Transformed`
    pub fn release(&mut self) -> Result<()> {
        self.check_transition(TileState::Released)?;
        self.drop_buffers();
        self.state = TileState::Released;
        Ok(())
    }

    /// Mark the tile failed and return its buffers
    pub fn fail(&mut self) {
        if self.state.can_advance_to(TileState::Failed) {
            self.state = TileState::Failed;
        }
        self.drop_buffers();
    }

    fn drop_buffers(&mut self) {
        self.pixels = None;
        self.spectrum = None;
    }

    fn check_transition(&self, to: TileState) -> Result<()> {
        if self.state.can_advance_to(to) {
            Ok(())
        } else {
            Err(StitchError::InvalidTransition {
                position: self.descriptor.position,
                from: self.state,
                to,
            })
        }
    }
}

fn missing_buffer(descriptor: &TileDescriptor, kind: &str) -> StitchError {
    StitchError::LoadFailure {
        position: descriptor.position,
        source_name: descriptor.source_name.clone(),
        reason: format!("{kind} buffer already returned"),
    }
}
