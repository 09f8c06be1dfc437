//! Spatial data structures of a tile grid
//!
//! This module contains spatial-related functionality including:
//! - Grid positions, directions and the tile grid
//! - Traversal orders and filename patterns
//! - Per-tile lifecycle state

/// Grid positions, neighbour directions and the tile grid
pub mod grid;
/// Filename patterns mapping positions to image names
pub mod naming;
/// Tile descriptors and the tile lifecycle
pub mod tiles;
/// Orders in which tiles are visited
pub mod traversal;

pub use grid::{Direction, GridPosition, TileGrid};
