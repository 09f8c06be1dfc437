//! Dense tile grid addressed by row and column
//!
//! The grid owns one descriptor per cell and hands out traversal sequences.
//! It never mutates tile state; the pipeline tracks lifecycle separately.

use ndarray::Array2;
use std::fmt;

use crate::io::configuration::MAX_GRID_DIMENSION;
use crate::io::error::{Result, StitchError, invalid_parameter};
use crate::spatial::naming::FilenamePattern;
use crate::spatial::tiles::TileDescriptor;
use crate::spatial::traversal::{Traversal, TraversalIter};

/// Row/column address of a tile in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GridPosition {
    /// Zero-based row index
    pub row: usize,
    /// Zero-based column index
    pub col: usize,
}

impl GridPosition {
    /// Create a position from row and column
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Adjacent position in `direction`, if it lies inside a `rows x cols` grid
    pub const fn neighbor(self, direction: Direction, rows: usize, cols: usize) -> Option<Self> {
        match direction {
            Direction::North if self.row > 0 => Some(Self::new(self.row - 1, self.col)),
            Direction::West if self.col > 0 => Some(Self::new(self.row, self.col - 1)),
            Direction::South if self.row + 1 < rows => Some(Self::new(self.row + 1, self.col)),
            Direction::East if self.col + 1 < cols => Some(Self::new(self.row, self.col + 1)),
            _ => None,
        }
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Direction from a tile to one of its four neighbours
///
/// Pairwise measurements are only ever taken against the north and west
/// neighbours; south and east are used when walking the adjacency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Previous row
    North,
    /// Previous column
    West,
    /// Next row
    South,
    /// Next column
    East,
}

impl Direction {
    /// Directions a pairwise correlation is measured in
    pub const MEASURED: [Self; 2] = [Self::North, Self::West];

    /// All four neighbour directions
    pub const ALL: [Self; 4] = [Self::North, Self::West, Self::South, Self::East];

    /// The direction pointing back
    pub const fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::West => Self::East,
            Self::South => Self::North,
            Self::East => Self::West,
        }
    }

    /// Whether pairs are stored under this direction
    pub const fn is_measured(self) -> bool {
        matches!(self, Self::North | Self::West)
    }

    /// Lower-case name for messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::North => "north",
            Self::West => "west",
            Self::South => "south",
            Self::East => "east",
        }
    }
}

/// Rectangular grid of tile descriptors
///
/// Extent is fixed at construction and every cell holds exactly one tile.
#[derive(Debug, Clone)]
pub struct TileGrid {
    tiles: Array2<TileDescriptor>,
}

impl TileGrid {
    /// Build a grid, naming each tile through `name_for`
    ///
    /// # Errors
    ///
    /// Returns `EmptyGrid` if either dimension is zero, or
    /// `InvalidParameter` if one exceeds the supported maximum
    pub fn new<F>(rows: usize, cols: usize, mut name_for: F) -> Result<Self>
    where
        F: FnMut(GridPosition) -> String,
    {
        check_dimensions(rows, cols)?;

        let tiles = Array2::from_shape_fn((rows, cols), |(row, col)| {
            let position = GridPosition::new(row, col);
            TileDescriptor::new(position, name_for(position))
        });

        Ok(Self { tiles })
    }

    /// Build a grid whose tile names come from a filename pattern
    ///
    /// # Errors
    ///
    /// Returns `EmptyGrid` for a zero dimension, or `InvalidParameter` if the
    /// pattern cannot name a tile
    pub fn from_pattern(rows: usize, cols: usize, pattern: &FilenamePattern) -> Result<Self> {
        check_dimensions(rows, cols)?;
        pattern.validate()?;

        let mut names = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                names.push(pattern.name_for(GridPosition::new(row, col), rows, cols)?);
            }
        }

        let mut names = names.into_iter();
        Self::new(rows, cols, |_| names.next().unwrap_or_default())
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.tiles.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.tiles.ncols()
    }

    /// Grid dimensions (rows, cols)
    pub fn dimensions(&self) -> (usize, usize) {
        self.tiles.dim()
    }

    /// Total number of tiles
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Number of adjacent north/west pairs
    pub fn pair_count(&self) -> usize {
        let (rows, cols) = self.dimensions();
        rows * (cols - 1) + (rows - 1) * cols
    }

    /// Check whether a position lies inside the grid
    pub fn contains(&self, position: GridPosition) -> bool {
        position.row < self.rows() && position.col < self.cols()
    }

    /// Descriptor at a position
    pub fn get(&self, position: GridPosition) -> Option<&TileDescriptor> {
        self.tiles.get([position.row, position.col])
    }

    /// Adjacent position in a direction, if inside the grid
    pub fn neighbor(&self, position: GridPosition, direction: Direction) -> Option<GridPosition> {
        position.neighbor(direction, self.rows(), self.cols())
    }

    /// Lazy traversal over every cell in the given order
    pub fn traversal(&self, order: Traversal) -> TraversalIter {
        order.iter(self.rows(), self.cols())
    }

    /// All descriptors in row-major order
    pub fn descriptors(&self) -> impl Iterator<Item = &TileDescriptor> {
        self.tiles.iter()
    }
}

fn check_dimensions(rows: usize, cols: usize) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(StitchError::EmptyGrid { rows, cols });
    }
    if rows > MAX_GRID_DIMENSION || cols > MAX_GRID_DIMENSION {
        return Err(invalid_parameter(
            "grid",
            &format!("{rows}x{cols}"),
            &format!("dimensions are limited to {MAX_GRID_DIMENSION}"),
        ));
    }
    Ok(())
}
