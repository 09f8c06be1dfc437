//! Seeded synthetic mosaics with known tile offsets

use image::{ImageBuffer, Luma};
use ndarray::{Array2, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::algorithm::correlation::Translation;
use crate::io::configuration::{
    DEFAULT_SEED, DEFAULT_SYNTHETIC_JITTER, DEFAULT_SYNTHETIC_OVERLAP_PERCENT,
    DEFAULT_SYNTHETIC_TILE_SIZE, SYNTHETIC_PATTERN,
};
use crate::io::error::{Result, StitchError, invalid_parameter};
use crate::io::source::MemorySource;
use crate::spatial::grid::{GridPosition, TileGrid};
use crate::spatial::naming::FilenamePattern;

/// Parameters of a synthetic mosaic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSpec {
    /// Tile rows
    pub rows: usize,
    /// Tile columns
    pub cols: usize,
    /// Tile height in pixels
    pub tile_height: usize,
    /// Tile width in pixels
    pub tile_width: usize,
    /// Nominal overlap of neighbours, in percent
    pub overlap_percent: f64,
    /// Largest random displacement from the nominal position, per axis
    pub jitter: i64,
    /// Seed of the scene and the displacements
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            rows: 3,
            cols: 3,
            tile_height: DEFAULT_SYNTHETIC_TILE_SIZE,
            tile_width: DEFAULT_SYNTHETIC_TILE_SIZE,
            overlap_percent: DEFAULT_SYNTHETIC_OVERLAP_PERCENT,
            jitter: DEFAULT_SYNTHETIC_JITTER,
            seed: DEFAULT_SEED,
        }
    }
}

/// Tiles cut from one random scene, with their true positions
#[derive(Debug, Clone)]
pub struct SyntheticMosaic {
    /// Grid naming every tile
    pub grid: TileGrid,
    /// Pixels of every tile
    pub source: MemorySource,
    /// True origin of every tile in the scene, indexed by `[row, col]`
    pub offsets: Array2<Translation>,
    /// Tile `(height, width)`
    pub tile_shape: (usize, usize),
}

impl SyntheticMosaic {
    /// True origins relative to tile (0, 0), as a stitched layout reports them
    pub fn expected_layout(&self) -> Array2<Translation> {
        let origin = self.offsets.get([0, 0]).copied().unwrap_or_default();
        self.offsets.mapv(|offset| offset - origin)
    }

    /// True translation of `tile` relative to its neighbour `neighbor`
    pub fn expected_translation(
        &self,
        tile: GridPosition,
        neighbor: GridPosition,
    ) -> Option<Translation> {
        let a = self.offsets.get([tile.row, tile.col])?;
        let b = self.offsets.get([neighbor.row, neighbor.col])?;
        Some(*a - *b)
    }

    /// Write every tile as a 16-bit grey PNG into `dir`
    ///
    /// # Errors
    ///
    /// Returns `FileSystem` or `ImageLoad` if a file cannot be written
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| StitchError::FileSystem {
            path: dir.to_path_buf(),
            operation: "create directory",
            source,
        })?;

        let (height, width) = self.tile_shape;
        for descriptor in self.grid.descriptors() {
            let Some(pixels) = self.source.get(&descriptor.source_name) else {
                continue;
            };
            let raw: Vec<u16> = pixels
                .iter()
                .map(|&value| value.round().clamp(0.0, f64::from(u16::MAX)) as u16)
                .collect();
            let path = dir.join(&descriptor.source_name);
            let image: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
                    invalid_parameter(
                        "tile_shape",
                        &format!("{height}x{width}"),
                        &"too large to encode",
                    )
                })?;
            image
                .save(&path)
                .map_err(|source| StitchError::ImageLoad { path, source })?;
        }
        Ok(())
    }
}

impl SyntheticSpec {
    /// Render the scene and cut it into tiles
    ///
    /// # Errors
    ///
    /// Returns `EmptyGrid` for a zero dimension, or `InvalidParameter` if
    /// the tile size, overlap or jitter leave no usable overlap
    pub fn generate(&self) -> Result<SyntheticMosaic> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let step_x = nominal_step(self.tile_width, self.overlap_percent);
        let step_y = nominal_step(self.tile_height, self.overlap_percent);
        let offsets = Array2::from_shape_fn((self.rows, self.cols), |(row, col)| {
            let jitter_x = rng.random_range(-self.jitter..=self.jitter);
            let jitter_y = rng.random_range(-self.jitter..=self.jitter);
            Translation::new(
                self.jitter + col as i64 * step_x + jitter_x,
                self.jitter + row as i64 * step_y + jitter_y,
            )
        });

        let far_x = offsets.iter().map(|o| o.dx).max().unwrap_or_default();
        let far_y = offsets.iter().map(|o| o.dy).max().unwrap_or_default();
        let scene_width = far_x as usize + self.tile_width;
        let scene_height = far_y as usize + self.tile_height;
        let scene = Array2::from_shape_fn((scene_height, scene_width), |_| {
            f64::from(rng.random_range(0..1000_u16))
        });

        let grid = TileGrid::from_pattern(
            self.rows,
            self.cols,
            &FilenamePattern::row_column(SYNTHETIC_PATTERN),
        )?;

        let mut source = MemorySource::new();
        for descriptor in grid.descriptors() {
            let position = descriptor.position;
            let origin = offsets
                .get([position.row, position.col])
                .copied()
                .unwrap_or_default();
            let (x, y) = (origin.dx as usize, origin.dy as usize);
            let tile = scene
                .slice(s![y..y + self.tile_height, x..x + self.tile_width])
                .to_owned();
            source.insert(descriptor.source_name.clone(), tile);
        }

        Ok(SyntheticMosaic {
            grid,
            source,
            offsets,
            tile_shape: (self.tile_height, self.tile_width),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(StitchError::EmptyGrid {
                rows: self.rows,
                cols: self.cols,
            });
        }
        if self.tile_height < 8 || self.tile_width < 8 {
            return Err(invalid_parameter(
                "tile_size",
                &format!("{}x{}", self.tile_height, self.tile_width),
                &"synthetic tiles must be at least 8x8",
            ));
        }
        let overlap_in_range = self.overlap_percent > 0.0 && self.overlap_percent < 100.0;
        if !overlap_in_range {
            return Err(invalid_parameter(
                "overlap_percent",
                &self.overlap_percent,
                &"must lie strictly between 0 and 100",
            ));
        }

        let smallest_overlap = (self.tile_width.min(self.tile_height) as f64
            * self.overlap_percent
            / 100.0)
            .round() as i64;
        if self.jitter < 0 || 2 * self.jitter >= smallest_overlap {
            return Err(invalid_parameter(
                "jitter",
                &self.jitter,
                &format!("must be non-negative and below half the {smallest_overlap} pixel overlap"),
            ));
        }
        Ok(())
    }
}

fn nominal_step(length: usize, overlap_percent: f64) -> i64 {
    let overlap = (length as f64 * overlap_percent / 100.0).round() as i64;
    length as i64 - overlap
}
