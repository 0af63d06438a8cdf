//! Host matrices and the tiled output buffer.
//!
//! [`Tensor`] is a dense row-major matrix used for GEMM operands and for
//! whole-matrix reductions. [`TileBuffer`] holds the GEMM output split into
//! one panel per column-tile-group, so a reduction over finished columns can
//! run while later columns are still being written.
//!
//! ```rust
//! use flash_overlap::tensor::Tensor;
//!
//! let tensor = Tensor::<f32>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
//! assert_eq!(tensor.shape(), &[2, 3]);
//! assert_eq!(tensor.get(1, 2), Some(6.0));
//! ```

use crate::error::{OverlapError, Result};
use flash_overlap_kernels::KernelElem;
use rand::Rng;

pub mod tile_buffer;

pub use tile_buffer::TileBuffer;

/// Trait bound for elements that can be stored in a Tensor.
///
/// Identical to the kernel crate's bound so operands can be handed to kernels
/// without conversion. `ToPrimitive`/`FromPrimitive` also carry elements over
/// the collective transport.
pub trait TensorElem: KernelElem + 'static {}

impl<T> TensorElem for T where T: KernelElem + 'static {}

/// A dense row-major 2-D matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T: TensorElem> {
    shape: [usize; 2],
    data: Vec<T>,
}

impl<T: TensorElem> Tensor<T> {
    /// Creates a matrix from row-major `data`.
    ///
    /// # Errors
    ///
    /// Returns `OverlapError::ShapeMismatch` if `data.len()` is not `rows * cols`.
    pub fn new(data: Vec<T>, shape: [usize; 2]) -> Result<Self> {
        let size = shape[0] * shape[1];
        if data.len() != size {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: [usize; 2]) -> Self {
        Self {
            shape,
            data: vec![T::zero(); shape[0] * shape[1]],
        }
    }

    /// Fills the matrix from `f(row, col)`.
    pub fn from_fn<F>(shape: [usize; 2], mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let mut data = Vec::with_capacity(shape[0] * shape[1]);
        for row in 0..shape[0] {
            for col in 0..shape[1] {
                data.push(f(row, col));
            }
        }
        Self { shape, data }
    }

    /// Uniform random values in `[-scale, scale)`.
    pub fn random<R: Rng>(shape: [usize; 2], scale: f64, rng: &mut R) -> Result<Self> {
        if scale.is_nan() || scale <= 0.0 {
            return Err(OverlapError::Unsupported(format!(
                "random scale must be positive, got {scale}"
            )));
        }
        let size = shape[0] * shape[1];
        let data = (0..size)
            .map(|_| {
                let value = rng.random_range(-scale..scale);
                T::from_f64(value).ok_or_else(|| {
                    OverlapError::Unsupported(format!(
                        "value {value} not representable in element type"
                    ))
                })
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize; 2] {
        &self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.shape[0] || col >= self.shape[1] {
            return None;
        }
        Some(self.data[row * self.shape[1] + col])
    }

    /// Largest absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> Result<f64> {
        if self.shape != other.shape {
            return Err(OverlapError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: other.shape.to_vec(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a.to_f64().unwrap_or(f64::NAN) - b.to_f64().unwrap_or(f64::NAN)).abs())
            .fold(0.0, f64::max))
    }
}
