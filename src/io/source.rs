//! Image sources that supply tile pixels to the pipeline
//!
//! Any failure to produce pixels is reported as `LoadFailure`, which the
//! pipeline absorbs per tile.

use ndarray::Array2;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::io::error::{Result, StitchError};
use crate::memory::pool::PixelBuffer;
use crate::spatial::tiles::TileDescriptor;

/// Supplier of raw tile pixels
pub trait ImageSource: Send + Sync {
    /// `(height, width)` of the named tile
    ///
    /// # Errors
    ///
    /// Returns `LoadFailure` if the tile cannot be inspected
    fn tile_shape(&self, descriptor: &TileDescriptor) -> Result<(usize, usize)>;

    /// Fill `pixels` with the tile's grey values
    ///
    /// # Errors
    ///
    /// Returns `LoadFailure` if the tile is missing, unreadable or not
    /// shaped like `pixels`
    fn load_pixels(&self, descriptor: &TileDescriptor, pixels: &mut PixelBuffer) -> Result<()>;
}

fn load_failure(descriptor: &TileDescriptor, reason: impl ToString) -> StitchError {
    StitchError::LoadFailure {
        position: descriptor.position,
        source_name: descriptor.source_name.clone(),
        reason: reason.to_string(),
    }
}

fn shape_mismatch(
    descriptor: &TileDescriptor,
    found: (usize, usize),
    expected: (usize, usize),
) -> StitchError {
    load_failure(
        descriptor,
        format!(
            "image is {}x{} but tiles are {}x{}",
            found.0, found.1, expected.0, expected.1
        ),
    )
}

/// Tiles stored as image files in one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Read tiles from `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the tiles are read from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of a tile's image file
    pub fn path_of(&self, descriptor: &TileDescriptor) -> PathBuf {
        self.root.join(&descriptor.source_name)
    }
}

impl ImageSource for DirectorySource {
    fn tile_shape(&self, descriptor: &TileDescriptor) -> Result<(usize, usize)> {
        let (width, height) = image::image_dimensions(self.path_of(descriptor))
            .map_err(|error| load_failure(descriptor, error))?;
        Ok((height as usize, width as usize))
    }

    fn load_pixels(&self, descriptor: &TileDescriptor, pixels: &mut PixelBuffer) -> Result<()> {
        let gray = image::open(self.path_of(descriptor))
            .map_err(|error| load_failure(descriptor, error))?
            .to_luma16();

        let found = (gray.height() as usize, gray.width() as usize);
        if found != pixels.dim() {
            return Err(shape_mismatch(descriptor, found, pixels.dim()));
        }

        for (value, pixel) in pixels.iter_mut().zip(gray.pixels()) {
            *value = f64::from(pixel.0[0]);
        }
        Ok(())
    }
}

/// Tiles held in memory, keyed by source name
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    images: HashMap<String, PixelBuffer>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an image
    pub fn insert(&mut self, name: impl Into<String>, pixels: Array2<f64>) {
        self.images.insert(name.into(), pixels);
    }

    /// Remove an image, making its tile fail to load
    pub fn remove(&mut self, name: &str) -> Option<PixelBuffer> {
        self.images.remove(name)
    }

    /// Image stored under `name`
    pub fn get(&self, name: &str) -> Option<&PixelBuffer> {
        self.images.get(name)
    }

    /// Number of stored images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no image is stored
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn lookup(&self, descriptor: &TileDescriptor) -> Result<&PixelBuffer> {
        self.images
            .get(&descriptor.source_name)
            .ok_or_else(|| load_failure(descriptor, "no such image"))
    }
}

impl ImageSource for MemorySource {
    fn tile_shape(&self, descriptor: &TileDescriptor) -> Result<(usize, usize)> {
        Ok(self.lookup(descriptor)?.dim())
    }

    fn load_pixels(&self, descriptor: &TileDescriptor, pixels: &mut PixelBuffer) -> Result<()> {
        let image = self.lookup(descriptor)?;
        if image.dim() != pixels.dim() {
            return Err(shape_mismatch(descriptor, image.dim(), pixels.dim()));
        }
        pixels.assign(image);
        Ok(())
    }
}
