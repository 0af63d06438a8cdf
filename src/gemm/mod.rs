//! GEMM kernel seam.
//!
//! The scheduler never multiplies matrices itself. It hands an ordered list of
//! tiles to a [`GemmKernel`], which must write each tile to the output buffer
//! and only then mark it complete in the [`CompletionMonitor`]. Kernels are
//! free to parallelize internally as long as they keep that order per tile.
//!
//! Work is issued through a [`DeviceStream`], which retires batches
//! asynchronously in submission order.

use crate::error::{OverlapError, Result};
use crate::monitor::CompletionMonitor;
use crate::tensor::{Tensor, TensorElem, TileBuffer};
use flash_overlap_kernels::{GemmShape, cpu_gemm_nt, cpu_gemm_tile, cpu_gemm_tile_par};
use rayon::prelude::*;
use std::ops::Range;

pub mod stream;

pub use stream::DeviceStream;

/// A tiled `C = A · Bᵀ` kernel with completion reporting.
pub trait GemmKernel<T: TensorElem>: Send + Sync {
    /// Computes the tiles in `order`, marking each in `monitor` once its data
    /// is in `c`.
    ///
    /// `a` is `M×K`, `b` is `N×K`, and `c`'s grid fixes `M`, `N` and the tiling.
    fn compute_tile_range(
        &self,
        a: &Tensor<T>,
        b: &Tensor<T>,
        c: &TileBuffer<T>,
        order: &[usize],
        monitor: &CompletionMonitor,
    ) -> Result<()>;

    /// Computes the whole product without tiling or completion tracking.
    fn compute_full(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>>;
}

/// How [`CpuTileGemm`] computes tiles, chosen by the tuning record's opaque
/// algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAlgo {
    /// One thread, tiles in order.
    Sequential,
    /// Tiles in order, rows of each tile spread over the rayon pool.
    RowParallel,
    /// Whole tiles of a batch spread over the rayon pool, the way a device
    /// runs a wave of thread blocks at once. Completion order within a batch
    /// is unspecified.
    TileParallel,
}

impl TileAlgo {
    pub fn from_selector(algo: u32) -> Self {
        match algo {
            0 => TileAlgo::Sequential,
            1 => TileAlgo::RowParallel,
            _ => TileAlgo::TileParallel,
        }
    }
}

/// CPU implementation of [`GemmKernel`] on top of `flash_overlap_kernels`.
#[derive(Debug, Clone, Copy)]
pub struct CpuTileGemm {
    algo: TileAlgo,
}

impl CpuTileGemm {
    pub fn new(algo: u32) -> Self {
        Self {
            algo: TileAlgo::from_selector(algo),
        }
    }

    pub fn algo(&self) -> TileAlgo {
        self.algo
    }
}

/// Checks `a` (`M×K`) and `b` (`N×K`) against each other and returns the GEMM extents.
pub fn gemm_shape<T: TensorElem>(a: &Tensor<T>, b: &Tensor<T>) -> Result<GemmShape> {
    if a.cols() != b.cols() {
        return Err(OverlapError::ShapeMismatch {
            expected: vec![b.rows(), a.cols()],
            got: b.shape().to_vec(),
        });
    }
    Ok(GemmShape::new(a.rows(), b.rows(), a.cols()))
}

type TileFn<T> = fn(&[T], &[T], GemmShape, Range<usize>, Range<usize>, &mut [T]) -> flash_overlap_kernels::Result<()>;

struct TileJob<'a, T: TensorElem> {
    a: &'a Tensor<T>,
    b: &'a Tensor<T>,
    c: &'a TileBuffer<T>,
    monitor: &'a CompletionMonitor,
    shape: GemmShape,
}

impl<T: TensorElem> TileJob<'_, T> {
    /// Computes `tile`, writes it to `c`, then marks it.
    fn run(&self, tile: usize, scratch: &mut Vec<T>, kernel: TileFn<T>) -> Result<()> {
        let grid = self.c.grid();
        let coord = grid.coord(tile)?;
        let rows = grid.row_range(coord.row);
        let cols = grid.col_range(coord.col);
        scratch.clear();
        scratch.resize(rows.len() * cols.len(), T::zero());

        kernel(self.a.data(), self.b.data(), self.shape, rows, cols, scratch).map_err(|e| {
            OverlapError::DeviceExecution {
                tile,
                reason: e.to_string(),
            }
        })?;

        self.c.write_tile(coord, scratch)?;
        self.monitor.mark_complete(tile)
    }
}

impl<T: TensorElem> GemmKernel<T> for CpuTileGemm {
    fn compute_tile_range(
        &self,
        a: &Tensor<T>,
        b: &Tensor<T>,
        c: &TileBuffer<T>,
        order: &[usize],
        monitor: &CompletionMonitor,
    ) -> Result<()> {
        let grid = *c.grid();
        let shape = gemm_shape(a, b)?;
        if shape.m != grid.m() || shape.n != grid.n() || shape.k != grid.k() {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![grid.m(), grid.n(), grid.k()],
                got: vec![shape.m, shape.n, shape.k],
            });
        }

        let job = TileJob {
            a,
            b,
            c,
            monitor,
            shape,
        };
        match self.algo {
            TileAlgo::Sequential | TileAlgo::RowParallel => {
                let kernel: TileFn<T> = if self.algo == TileAlgo::Sequential {
                    cpu_gemm_tile
                } else {
                    cpu_gemm_tile_par
                };
                let mut scratch = Vec::with_capacity(grid.bm() * grid.bn());
                order
                    .iter()
                    .try_for_each(|&tile| job.run(tile, &mut scratch, kernel))
            }
            TileAlgo::TileParallel => order
                .par_iter()
                .try_for_each_init(Vec::new, |scratch, &tile| job.run(tile, scratch, cpu_gemm_tile)),
        }
    }

    fn compute_full(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>> {
        let shape = gemm_shape(a, b)?;
        let data = cpu_gemm_nt(a.data(), b.data(), shape)?;
        Tensor::new(data, [shape.m, shape.n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileGrid;

    fn operands() -> (Tensor<f64>, Tensor<f64>) {
        let a = Tensor::from_fn([5, 3], |r, c| (r + c) as f64);
        let b = Tensor::from_fn([7, 3], |r, c| (r as f64) - (c as f64));
        (a, b)
    }

    #[test]
    fn test_tiles_assemble_full_product() {
        let (a, b) = operands();
        let grid = TileGrid::new(5, 7, 3, 2, 3).unwrap();
        let monitor = CompletionMonitor::new(&grid);

        for algo in [0, 1, 2] {
            let c = TileBuffer::new(grid);
            let kernel = CpuTileGemm::new(algo);
            monitor.reset();
            let order: Vec<usize> = (0..grid.tile_count()).rev().collect();
            kernel
                .compute_tile_range(&a, &b, &c, &order, &monitor)
                .unwrap();
            assert!(monitor.all_complete());
            assert_eq!(c.to_tensor(), kernel.compute_full(&a, &b).unwrap());
        }
    }

    #[test]
    fn test_partial_range_marks_only_its_tiles() {
        let (a, b) = operands();
        let grid = TileGrid::new(5, 7, 3, 2, 3).unwrap();
        let c = TileBuffer::new(grid);
        let monitor = CompletionMonitor::new(&grid);

        // Column group 1 is tiles 1, 4 and 7.
        CpuTileGemm::new(0)
            .compute_tile_range(&a, &b, &c, &[1, 4, 7], &monitor)
            .unwrap();
        assert_eq!(monitor.snapshot(), vec![0, 3, 0]);
    }

    #[test]
    fn test_repeated_tile_overflows_monitor() {
        let (a, b) = operands();
        let grid = TileGrid::new(5, 7, 3, 2, 3).unwrap();
        let c = TileBuffer::new(grid);
        let monitor = CompletionMonitor::new(&grid);
        let err = CpuTileGemm::new(0)
            .compute_tile_range(&a, &b, &c, &[1, 4, 7, 1], &monitor)
            .unwrap_err();
        assert!(matches!(err, OverlapError::MonitorOverflow { col: 1, target: 3 }));
    }

    #[test]
    fn test_mismatched_operands() {
        let (a, _) = operands();
        let b = Tensor::<f64>::zeros([7, 4]);
        let grid = TileGrid::new(5, 7, 3, 2, 3).unwrap();
        let c = TileBuffer::new(grid);
        let monitor = CompletionMonitor::new(&grid);
        let err = CpuTileGemm::new(1).compute_tile_range(&a, &b, &c, &[0], &monitor);
        assert!(matches!(err, Err(OverlapError::ShapeMismatch { .. })));
        assert_eq!(monitor.snapshot(), vec![0, 0, 0]);
    }

    #[test]
    fn test_algo_selector() {
        assert_eq!(CpuTileGemm::new(0).algo(), TileAlgo::Sequential);
        assert_eq!(CpuTileGemm::new(1).algo(), TileAlgo::RowParallel);
        assert_eq!(CpuTileGemm::new(3).algo(), TileAlgo::TileParallel);
    }
}
