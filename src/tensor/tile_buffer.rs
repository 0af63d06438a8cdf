//! GEMM output partitioned by column-tile-group.
//!
//! Panel `c` stores the `M × width(c)` block of columns `grid.col_range(c)`
//! row-major. Tile writes lock one panel; region reductions lock the panels
//! they touch one at a time. Because a segment's panels are never written again
//! once its tiles are complete, reducing segment `s` does not contend with tile
//! writes for later segments.

use super::{Tensor, TensorElem};
use crate::error::{OverlapError, Result};
use crate::tile::{TileCoord, TileGrid};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct TileBuffer<T: TensorElem> {
    grid: TileGrid,
    panels: Vec<Mutex<Vec<T>>>,
}

impl<T: TensorElem> TileBuffer<T> {
    /// A zero-filled buffer for the output described by `grid`.
    pub fn new(grid: TileGrid) -> Self {
        let panels = (0..grid.cols())
            .map(|col| Mutex::new(vec![T::zero(); grid.m() * grid.col_width(col)]))
            .collect();
        Self { grid, panels }
    }

    /// Splits a row-major `M×N` tensor into panels.
    pub fn from_tensor(grid: TileGrid, tensor: &Tensor<T>) -> Result<Self> {
        check_shape(&grid, tensor.shape())?;
        let buffer = Self::new(grid);
        let data = tensor.data();
        for (col, panel) in buffer.panels.iter().enumerate() {
            let cols = grid.col_range(col);
            let mut panel = lock(panel);
            for (row, dst) in panel.chunks_mut(cols.len()).enumerate() {
                let start = row * grid.n();
                dst.copy_from_slice(&data[start + cols.start..start + cols.end]);
            }
        }
        Ok(buffer)
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Stores the row-major contents of tile `coord`.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `tile` does not hold exactly the tile's elements.
    pub fn write_tile(&self, coord: TileCoord, tile: &[T]) -> Result<()> {
        let rows = self.grid.row_range(coord.row);
        let width = self.grid.col_width(coord.col);
        if coord.col >= self.panels.len() || tile.len() != rows.len() * width {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![rows.len(), width],
                got: vec![tile.len()],
            });
        }
        if width == 0 {
            return Ok(());
        }
        let mut panel = lock(&self.panels[coord.col]);
        panel[rows.start * width..rows.end * width].copy_from_slice(tile);
        Ok(())
    }

    /// Copies the region `rows × cols` (element ranges) into a contiguous vector.
    ///
    /// Elements are ordered panel by panel, then row by row inside a panel.
    /// [`scatter`](Self::scatter) uses the same order, and so does every rank
    /// holding an identically shaped buffer.
    pub fn gather(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Vec<T>> {
        self.check_region(&rows, &cols)?;
        let mut out = Vec::with_capacity(rows.len() * cols.len());
        for (col, local) in self.panel_slices(&cols) {
            let width = self.grid.col_width(col);
            let panel = lock(&self.panels[col]);
            for row in rows.clone() {
                let base = row * width;
                out.extend_from_slice(&panel[base + local.start..base + local.end]);
            }
        }
        Ok(out)
    }

    /// Writes `data` (in [`gather`](Self::gather) order) back into `rows × cols`.
    pub fn scatter(&self, rows: Range<usize>, cols: Range<usize>, data: &[T]) -> Result<()> {
        self.check_region(&rows, &cols)?;
        if data.len() != rows.len() * cols.len() {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![rows.len(), cols.len()],
                got: vec![data.len()],
            });
        }
        let mut offset = 0;
        for (col, local) in self.panel_slices(&cols) {
            let width = self.grid.col_width(col);
            let mut panel = lock(&self.panels[col]);
            for row in rows.clone() {
                let base = row * width;
                let len = local.len();
                panel[base + local.start..base + local.end]
                    .copy_from_slice(&data[offset..offset + len]);
                offset += len;
            }
        }
        Ok(())
    }

    /// Reassembles the row-major `M×N` matrix.
    pub fn to_tensor(&self) -> Tensor<T> {
        let mut out = Tensor::zeros([self.grid.m(), self.grid.n()]);
        let n = self.grid.n();
        let data = out.data_mut();
        for (col, panel) in self.panels.iter().enumerate() {
            let cols = self.grid.col_range(col);
            let panel = lock(panel);
            for (row, src) in panel.chunks(cols.len().max(1)).enumerate() {
                let start = row * n;
                data[start + cols.start..start + cols.end].copy_from_slice(src);
            }
        }
        out
    }

    /// Panels intersecting `cols`, with the intersection in panel-local columns.
    fn panel_slices(&self, cols: &Range<usize>) -> Vec<(usize, Range<usize>)> {
        if cols.is_empty() {
            return Vec::new();
        }
        let first = cols.start / self.grid.bn();
        let last = (cols.end - 1) / self.grid.bn();
        (first..=last)
            .map(|col| {
                let panel_cols = self.grid.col_range(col);
                let lo = cols.start.max(panel_cols.start) - panel_cols.start;
                let hi = cols.end.min(panel_cols.end) - panel_cols.start;
                (col, lo..hi)
            })
            .collect()
    }

    fn check_region(&self, rows: &Range<usize>, cols: &Range<usize>) -> Result<()> {
        if rows.start > rows.end
            || cols.start > cols.end
            || rows.end > self.grid.m()
            || cols.end > self.grid.n()
        {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![self.grid.m(), self.grid.n()],
                got: vec![rows.end, cols.end],
            });
        }
        Ok(())
    }
}

fn check_shape(grid: &TileGrid, shape: &[usize; 2]) -> Result<()> {
    if shape != &[grid.m(), grid.n()] {
        return Err(OverlapError::ShapeMismatch {
            expected: vec![grid.m(), grid.n()],
            got: shape.to_vec(),
        });
    }
    Ok(())
}

// A panic while holding a panel leaves plain numbers behind; the run that
// panicked is already lost, so the data is still safe to read.
fn lock<T>(panel: &Mutex<T>) -> MutexGuard<'_, T> {
    panel.lock().unwrap_or_else(PoisonError::into_inner)
}
