//! Traversal orders over a tile grid
//!
//! Each order is a lazy, restartable sequence that visits every cell exactly
//! once. The order decides how soon north and west neighbours become
//! available to the pipeline, and therefore how many tiles must be held in
//! memory at once.

use bitvec::prelude::*;

use crate::spatial::grid::{Direction, GridPosition};

/// Order in which the pipeline visits tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Traversal {
    /// Left to right within each row, rows top to bottom
    Row,
    /// Top to bottom within each column, columns left to right
    Column,
    /// Anti-diagonals of increasing `row + col`, each walked by increasing row
    #[default]
    Diagonal,
    /// Serpentine rows, alternating left-to-right and right-to-left
    RowChained,
}

impl Traversal {
    /// Every available order
    pub const ALL: [Self; 4] = [Self::Row, Self::Column, Self::Diagonal, Self::RowChained];

    /// Lower-case name for messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::Row => "row",
            Self::Column => "column",
            Self::Diagonal => "diagonal",
            Self::RowChained => "row-chained",
        }
    }

    /// Start a traversal over a `rows x cols` grid
    pub const fn iter(self, rows: usize, cols: usize) -> TraversalIter {
        TraversalIter::new(self, rows, cols)
    }

    /// Zero-based step at which `position` is visited
    ///
    /// Computed in closed form, without walking the sequence.
    pub fn rank_of(self, position: GridPosition, rows: usize, cols: usize) -> Option<usize> {
        if position.row >= rows || position.col >= cols {
            return None;
        }
        let GridPosition { row, col } = position;

        let rank = match self {
            Self::Row => row * cols + col,
            Self::Column => col * rows + row,
            Self::RowChained => {
                let along = if row % 2 == 0 { col } else { cols - 1 - col };
                row * cols + along
            }
            Self::Diagonal => {
                let diagonal = row + col;
                let before: usize = (0..diagonal)
                    .map(|d| diagonal_span(d, rows, cols).len())
                    .sum();
                before + row - diagonal_span(diagonal, rows, cols).start
            }
        };

        Some(rank)
    }

    /// Peak number of tiles that must be held at once when tiles are
    /// visited in this order and each is kept until all of its neighbours
    /// have been visited
    ///
    /// A buffer pool smaller than this cannot make progress.
    pub fn minimum_in_flight(self, rows: usize, cols: usize) -> usize {
        let mut visited = bitvec![0; rows * cols];
        let mut retired = bitvec![0; rows * cols];
        let index = |p: GridPosition| p.row * cols + p.col;
        let is_set = |bits: &BitVec, p: GridPosition| bits.get(index(p)).as_deref() == Some(&true);

        let mut live = 0usize;
        let mut peak = 0usize;

        for position in self.iter(rows, cols) {
            visited.set(index(position), true);
            live += 1;
            peak = peak.max(live);

            let mut candidates = vec![position];
            candidates.extend(
                Direction::ALL
                    .iter()
                    .filter_map(|&d| position.neighbor(d, rows, cols)),
            );

            for candidate in candidates {
                if !is_set(&visited, candidate) || is_set(&retired, candidate) {
                    continue;
                }
                let settled = Direction::ALL
                    .iter()
                    .filter_map(|&d| candidate.neighbor(d, rows, cols))
                    .all(|n| is_set(&visited, n));
                if settled {
                    retired.set(index(candidate), true);
                    live -= 1;
                }
            }
        }

        peak
    }
}

/// Rows crossed by anti-diagonal `diagonal`
fn diagonal_span(diagonal: usize, rows: usize, cols: usize) -> std::ops::Range<usize> {
    let start = diagonal.saturating_sub(cols.saturating_sub(1));
    let end = diagonal.min(rows.saturating_sub(1)) + 1;
    start..end.max(start)
}

/// Lazy iterator over grid positions in traversal order
///
/// Holds only a cursor; `reset` restarts the sequence from the beginning.
#[derive(Debug, Clone)]
pub struct TraversalIter {
    order: Traversal,
    rows: usize,
    cols: usize,
    next: Option<GridPosition>,
    remaining: usize,
}

impl TraversalIter {
    const fn new(order: Traversal, rows: usize, cols: usize) -> Self {
        let remaining = rows * cols;
        Self {
            order,
            rows,
            cols,
            next: if remaining == 0 {
                None
            } else {
                Some(GridPosition::new(0, 0))
            },
            remaining,
        }
    }

    /// Order this iterator follows
    pub const fn order(&self) -> Traversal {
        self.order
    }

    /// Restart from the first cell
    pub fn reset(&mut self) {
        *self = Self::new(self.order, self.rows, self.cols);
    }

    fn successor(&self, current: GridPosition) -> Option<GridPosition> {
        let (rows, cols) = (self.rows, self.cols);
        let GridPosition { row, col } = current;

        let next = match self.order {
            Traversal::Row => {
                if col + 1 < cols {
                    GridPosition::new(row, col + 1)
                } else {
                    GridPosition::new(row + 1, 0)
                }
            }
            Traversal::Column => {
                if row + 1 < rows {
                    GridPosition::new(row + 1, col)
                } else {
                    GridPosition::new(0, col + 1)
                }
            }
            Traversal::RowChained => {
                let rightward = row % 2 == 0;
                if rightward && col + 1 < cols {
                    GridPosition::new(row, col + 1)
                } else if !rightward && col > 0 {
                    GridPosition::new(row, col - 1)
                } else {
                    GridPosition::new(row + 1, col)
                }
            }
            Traversal::Diagonal => {
                if row + 1 < rows && col > 0 {
                    GridPosition::new(row + 1, col - 1)
                } else {
                    let diagonal = row + col + 1;
                    let start = diagonal_span(diagonal, rows, cols).start;
                    GridPosition::new(start, diagonal - start)
                }
            }
        };

        (next.row < rows && next.col < cols).then_some(next)
    }
}

impl Iterator for TraversalIter {
    type Item = GridPosition;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        self.next = if self.remaining == 0 {
            None
        } else {
            self.successor(current)
        };
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for TraversalIter {}
