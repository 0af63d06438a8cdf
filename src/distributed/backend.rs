use crate::error::Result;
use crate::tensor::{Tensor, TensorElem, TileBuffer};
use std::ops::Range;

/// Abstraction for a collective communication backend.
///
/// Every participating rank must issue the same sequence of calls with
/// identically shaped arguments; a collective is only defined when all ranks
/// reach it. A rank that never arrives is reported by the backend as a
/// failure on its peers.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Performs an All-Reduce sum over a whole tensor and returns the result.
    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>>;

    /// Performs an in-place All-Reduce sum over the `rows × cols` region of `buffer`.
    ///
    /// `rows` and `cols` are element ranges. Returns once the reduced values
    /// are written back.
    fn all_reduce_region<T: TensorElem>(
        &self,
        buffer: &TileBuffer<T>,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<()>;
}
