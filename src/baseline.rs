//! Non-overlapped reference path: the whole GEMM, then one whole-matrix
//! all-reduce. Used to measure the overlap speedup and as a correctness
//! reference.

use crate::distributed::CollectiveBackend;
use crate::error::Result;
use crate::gemm::GemmKernel;
use crate::tensor::{Tensor, TensorElem};

/// Computes `A · Bᵀ` and all-reduces the result across `comm`.
pub fn compute_then_reduce<T, K, B>(kernel: &K, a: &Tensor<T>, b: &Tensor<T>, comm: &B) -> Result<Tensor<T>>
where
    T: TensorElem,
    K: GemmKernel<T> + ?Sized,
    B: CollectiveBackend,
{
    let product = kernel.compute_full(a, b)?;
    tracing::trace!(rank = comm.rank(), shape = ?product.shape(), "baseline reduce");
    comm.all_reduce_sum(&product)
}
