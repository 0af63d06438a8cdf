//! Tile index space.
//!
//! The `M×N` output of a GEMM is cut into `BM×BN` tiles. Tiles on the right or
//! bottom edge may be ragged when the extents are not multiples of the tile
//! extents. Tile ids are row-major over the tile grid:
//!
//! ```text
//!            col 0   col 1   col 2   col 3
//! row 0   [    0  |    1  |    2  |    3  ]
//! row 1   [    4  |    5  |    6  |    7  ]
//! row 2   [    8  |    9  |   10  |   11  ]
//! ```
//!
//! A *column-tile-group* is one column of this grid; it is the unit at which
//! completion is tracked and communication segments are cut.

use crate::error::{OverlapError, Result};
use std::ops::Range;

/// `⌈x / y⌉`.
pub fn div_up(x: usize, y: usize) -> usize {
    x.div_ceil(y)
}

/// Position of a tile in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub row: usize,
    pub col: usize,
}

/// Immutable description of how the output matrix is tiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    m: usize,
    n: usize,
    k: usize,
    bm: usize,
    bn: usize,
    rows: usize,
    cols: usize,
}

impl TileGrid {
    /// Creates the grid for a `m×n` output (reduction depth `k`) tiled by `bm×bn`.
    ///
    /// # Errors
    ///
    /// Returns `OverlapError::InvalidTileShape` if any extent is zero.
    pub fn new(m: usize, n: usize, k: usize, bm: usize, bn: usize) -> Result<Self> {
        if m == 0 || n == 0 || k == 0 {
            return Err(OverlapError::InvalidTileShape(format!(
                "matrix extents must be non-zero, got m={m} n={n} k={k}"
            )));
        }
        if bm == 0 || bn == 0 {
            return Err(OverlapError::InvalidTileShape(format!(
                "tile extents must be non-zero, got BM={bm} BN={bn}"
            )));
        }
        Ok(Self {
            m,
            n,
            k,
            bm,
            bn,
            rows: div_up(m, bm),
            cols: div_up(n, bn),
        })
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn bm(&self) -> usize {
        self.bm
    }

    pub fn bn(&self) -> usize {
        self.bn
    }

    /// Number of row-tiles, which is also the size of every column-tile-group.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of column-tile-groups.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn tile_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn contains(&self, tile: usize) -> bool {
        tile < self.tile_count()
    }

    /// Row-major coordinate of `tile`.
    pub fn coord(&self, tile: usize) -> Result<TileCoord> {
        if !self.contains(tile) {
            return Err(OverlapError::TileOutOfRange {
                tile,
                tile_count: self.tile_count(),
            });
        }
        Ok(TileCoord {
            row: tile / self.cols,
            col: tile % self.cols,
        })
    }

    pub fn tile_id(&self, coord: TileCoord) -> usize {
        coord.row * self.cols + coord.col
    }

    /// Element rows covered by row-tile `row`, clamped to `M`.
    pub fn row_range(&self, row: usize) -> Range<usize> {
        let start = (row * self.bm).min(self.m);
        start..(start + self.bm).min(self.m)
    }

    /// Element columns covered by column-tile-group `col`, clamped to `N`.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        let start = (col * self.bn).min(self.n);
        start..(start + self.bn).min(self.n)
    }

    pub fn col_width(&self, col: usize) -> usize {
        self.col_range(col).len()
    }

    /// Element columns covered by the column-tile-groups `groups`.
    pub fn column_span(&self, groups: Range<usize>) -> Range<usize> {
        let start = (groups.start * self.bn).min(self.n);
        let end = (groups.end * self.bn).min(self.n).max(start);
        start..end
    }

    /// Tile ids of column-tile-group `col`, top to bottom.
    pub fn tiles_in_column(&self, col: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.rows).map(move |row| self.tile_id(TileCoord { row, col }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shape() {
        let grid = TileGrid::new(96, 128, 64, 32, 32).unwrap();
        assert_eq!(grid.rows(), 3);
        assert_eq!(grid.cols(), 4);
        assert_eq!(grid.tile_count(), 12);
    }

    #[test]
    fn test_ragged_edges() {
        let grid = TileGrid::new(10, 7, 3, 4, 3).unwrap();
        assert_eq!(grid.rows(), 3);
        assert_eq!(grid.cols(), 3);
        assert_eq!(grid.row_range(2), 8..10);
        assert_eq!(grid.col_range(2), 6..7);
        assert_eq!(grid.col_width(2), 1);
        assert_eq!(grid.column_span(1..3), 3..7);
        assert_eq!(grid.column_span(0..3), 0..7);
    }

    #[test]
    fn test_row_major_ids() {
        let grid = TileGrid::new(96, 128, 64, 32, 32).unwrap();
        assert_eq!(grid.coord(6).unwrap(), TileCoord { row: 1, col: 2 });
        assert_eq!(grid.tile_id(TileCoord { row: 2, col: 3 }), 11);
        assert_eq!(grid.tiles_in_column(1).collect::<Vec<_>>(), vec![1, 5, 9]);
        assert!(matches!(
            grid.coord(12),
            Err(OverlapError::TileOutOfRange { tile: 12, .. })
        ));
    }

    #[test]
    fn test_zero_extents_rejected() {
        assert!(matches!(
            TileGrid::new(0, 8, 8, 4, 4),
            Err(OverlapError::InvalidTileShape(_))
        ));
        assert!(matches!(
            TileGrid::new(8, 8, 8, 4, 0),
            Err(OverlapError::InvalidTileShape(_))
        ));
    }
}
