use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;
use std::ops::Range;

/// Extents of `C[M, N] = A[M, K] · B[N, K]ᵀ`.
///
/// Both operands are row-major and share the reduction dimension as their
/// last axis (the "NT" layout), so every output element is a dot product of
/// two contiguous rows and no transpose is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl GemmShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// Checks operand lengths against the shape.
    pub fn validate<T>(&self, lhs: &[T], rhs: &[T]) -> Result<()> {
        if lhs.len() != self.m * self.k {
            return Err(KernelError::ShapeMismatch {
                expected: vec![self.m, self.k],
                got: vec![lhs.len()],
            });
        }
        if rhs.len() != self.n * self.k {
            return Err(KernelError::ShapeMismatch {
                expected: vec![self.n, self.k],
                got: vec![rhs.len()],
            });
        }
        Ok(())
    }

    fn check_tile<T>(&self, rows: &Range<usize>, cols: &Range<usize>, out: &[T]) -> Result<()> {
        if rows.start > rows.end || cols.start > cols.end || rows.end > self.m || cols.end > self.n
        {
            return Err(KernelError::TileOutOfBounds {
                rows: rows.clone(),
                cols: cols.clone(),
                m: self.m,
                n: self.n,
            });
        }
        let expected = rows.len() * cols.len();
        if out.len() != expected {
            return Err(KernelError::ShapeMismatch {
                expected: vec![rows.len(), cols.len()],
                got: vec![out.len()],
            });
        }
        Ok(())
    }
}

#[inline]
fn dot<T: KernelElem>(a: &[T], b: &[T]) -> T {
    let mut sum = T::zero();
    // Vectorizable loop
    for (&val_a, &val_b) in a.iter().zip(b.iter()) {
        sum += val_a * val_b;
    }
    sum
}

fn tile_row<T: KernelElem>(
    lhs: &[T],
    rhs: &[T],
    k: usize,
    row: usize,
    cols: &Range<usize>,
    out_row: &mut [T],
) {
    let a_slice = &lhs[row * k..(row + 1) * k];
    for (col, out_elem) in cols.clone().zip(out_row.iter_mut()) {
        let b_slice = &rhs[col * k..(col + 1) * k];
        *out_elem = dot(a_slice, b_slice);
    }
}

/// Computes one output tile `C[rows, cols]` into `out` (row-major, `rows.len() × cols.len()`).
///
/// Single-threaded: the caller decides how tiles are spread over workers.
pub fn cpu_gemm_tile<T>(
    lhs: &[T],
    rhs: &[T],
    shape: GemmShape,
    rows: Range<usize>,
    cols: Range<usize>,
    out: &mut [T],
) -> Result<()>
where
    T: KernelElem,
{
    shape.validate(lhs, rhs)?;
    shape.check_tile(&rows, &cols, out)?;
    let width = cols.len();
    if width == 0 {
        return Ok(());
    }

    for (row, out_row) in rows.zip(out.chunks_mut(width)) {
        tile_row(lhs, rhs, shape.k, row, &cols, out_row);
    }
    Ok(())
}

/// Same contract as [`cpu_gemm_tile`], with the tile's rows spread over the rayon pool.
pub fn cpu_gemm_tile_par<T>(
    lhs: &[T],
    rhs: &[T],
    shape: GemmShape,
    rows: Range<usize>,
    cols: Range<usize>,
    out: &mut [T],
) -> Result<()>
where
    T: KernelElem,
{
    shape.validate(lhs, rhs)?;
    shape.check_tile(&rows, &cols, out)?;
    let width = cols.len();
    if width == 0 {
        return Ok(());
    }

    let first_row = rows.start;
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(offset, out_row)| {
            tile_row(lhs, rhs, shape.k, first_row + offset, &cols, out_row);
        });
    Ok(())
}

/// Full `C = A · Bᵀ`, parallelized over output rows.
///
/// This is the whole-matrix path used when no tiling or completion tracking
/// is wanted.
pub fn cpu_gemm_nt<T>(lhs: &[T], rhs: &[T], shape: GemmShape) -> Result<Vec<T>>
where
    T: KernelElem,
{
    shape.validate(lhs, rhs)?;
    let mut out = vec![T::zero(); shape.m * shape.n];
    if shape.n == 0 {
        return Ok(out);
    }

    let all_cols = 0..shape.n;
    out.par_chunks_mut(shape.n)
        .enumerate()
        .for_each(|(row, out_row)| {
            tile_row(lhs, rhs, shape.k, row, &all_cols, out_row);
        });
    Ok(out)
}
