use super::backend::CollectiveBackend;
use crate::error::{OverlapError, Result};
use crate::tensor::{Tensor, TensorElem, TileBuffer};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::ops::Range;
use std::time::Duration;

/// Payload on the ring. Elements travel as `f64` so one channel type serves
/// every element type; `f32` and small integers convert exactly.
pub type Chunk = Vec<f64>;

pub const DEFAULT_COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// A CPU-based collective backend.
///
/// Implements the **Ring All-Reduce** algorithm using `crossbeam` channels:
/// the buffer is cut into `world_size` chunks, a scatter-reduce phase leaves
/// each rank with one fully reduced chunk, and an all-gather phase circulates
/// the reduced chunks to everyone.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Chunk>, // Receive from rank - 1
    right_tx: Sender<Chunk>,  // Send to rank + 1
    timeout: Duration,
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Chunk>,
        right_tx: Sender<Chunk>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
            timeout: DEFAULT_COLLECTIVE_TIMEOUT,
        }
    }

    /// Sets how long a receive may wait for the left neighbour.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn failure(&self, reason: impl Into<String>) -> OverlapError {
        OverlapError::Collective {
            rank: self.rank,
            reason: reason.into(),
        }
    }

    fn chunk_range(&self, chunk: usize, chunk_size: usize, total: usize) -> Range<usize> {
        let start = (chunk * chunk_size).min(total);
        start..(start + chunk_size).min(total)
    }

    fn ring_index(&self, offset: isize) -> usize {
        (self.rank as isize + offset).rem_euclid(self.world_size as isize) as usize
    }

    fn send<T: TensorElem>(&self, data: &[T]) -> Result<()> {
        let chunk = data
            .iter()
            .map(|v| {
                v.to_f64()
                    .ok_or_else(|| self.failure("element not representable on the ring"))
            })
            .collect::<Result<Chunk>>()?;
        self.right_tx
            .send(chunk)
            .map_err(|_| self.failure("right neighbour disconnected"))
    }

    fn recv(&self, expected: usize) -> Result<Chunk> {
        let chunk = self.left_rx.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => self.failure(format!(
                "timed out after {:?} waiting for left neighbour",
                self.timeout
            )),
            RecvTimeoutError::Disconnected => self.failure("left neighbour disconnected"),
        })?;
        if chunk.len() != expected {
            return Err(self.failure(format!(
                "received {} elements, expected {}; ranks disagree on the buffer shape",
                chunk.len(),
                expected
            )));
        }
        Ok(chunk)
    }

    /// In-place ring all-reduce (sum) of `data` across the ring.
    pub fn ring_all_reduce<T: TensorElem>(&self, data: &mut [T]) -> Result<()> {
        let total_elements = data.len();
        let chunk_size = total_elements.div_ceil(self.world_size.max(1));

        // --- Phase 1: Scatter-Reduce ---
        // In each step, we send a chunk to the right and receive a chunk from the left.
        // We add the received chunk to our local buffer.
        for step in 0..self.world_size.saturating_sub(1) {
            let step = step as isize;
            let send = self.chunk_range(self.ring_index(-step), chunk_size, total_elements);
            let recv = self.chunk_range(self.ring_index(-step - 1), chunk_size, total_elements);

            self.send(&data[send])?;
            let received = self.recv(recv.len())?;

            for (slot, val) in data[recv].iter_mut().zip(received) {
                *slot += T::from_f64(val).ok_or_else(|| self.failure("element overflow"))?;
            }
        }

        // --- Phase 2: All-Gather ---
        // Now each rank has one fully reduced chunk. We need to share it with everyone.
        for step in 0..self.world_size.saturating_sub(1) {
            let step = step as isize;
            let send = self.chunk_range(self.ring_index(1 - step), chunk_size, total_elements);
            let recv = self.chunk_range(self.ring_index(-step), chunk_size, total_elements);

            self.send(&data[send])?;
            let received = self.recv(recv.len())?;

            for (slot, val) in data[recv].iter_mut().zip(received) {
                *slot = T::from_f64(val).ok_or_else(|| self.failure("element overflow"))?;
            }
        }

        Ok(())
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>> {
        let mut data = tensor.data().to_vec();
        self.ring_all_reduce(&mut data)?;
        Tensor::new(data, *tensor.shape())
    }

    fn all_reduce_region<T: TensorElem>(
        &self,
        buffer: &TileBuffer<T>,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<()> {
        let mut data = buffer.gather(rows.clone(), cols.clone())?;
        self.ring_all_reduce(&mut data)?;
        buffer.scatter(rows, cols, &data)
    }
}
