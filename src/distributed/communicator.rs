//! Communicator bootstrap.
//!
//! A run starts by creating one [`UniqueId`] and handing it to every rank. Each
//! rank then calls [`Communicator::init`] with its own rank index, which claims
//! that rank's ring endpoints from the token. Endpoints are moved out, not
//! shared: once a rank's communicator is dropped its neighbours observe a
//! disconnect instead of waiting forever.

use super::backend::CollectiveBackend;
use super::cpu_backend::{Chunk, CpuBackend, DEFAULT_COLLECTIVE_TIMEOUT};
use crate::error::{OverlapError, Result};
use crate::tensor::{Tensor, TensorElem, TileBuffer};
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::fmt;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

type Endpoints = (Receiver<Chunk>, Sender<Chunk>);

/// Shared setup token from which every rank builds its communicator.
pub struct UniqueId {
    token: u64,
    world_size: usize,
    slots: Mutex<Vec<Option<Endpoints>>>,
}

impl UniqueId {
    /// Wires a ring of `world_size` ranks.
    ///
    /// Channel `i` connects rank `i` to rank `i + 1`: rank `i` sends on it and
    /// rank `i + 1` receives from it.
    pub fn new(world_size: usize) -> Self {
        let (txs, rxs): (Vec<Sender<Chunk>>, Vec<Receiver<Chunk>>) =
            (0..world_size).map(|_| unbounded()).unzip();

        let slots = (0..world_size)
            .map(|rank| {
                let left_rx = rxs[(rank + world_size - 1) % world_size].clone();
                let right_tx = txs[rank].clone();
                Some((left_rx, right_tx))
            })
            .collect();

        Self {
            token: rand::random(),
            world_size,
            slots: Mutex::new(slots),
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    fn claim(&self, rank: usize) -> Result<Endpoints> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get_mut(rank).ok_or_else(|| OverlapError::Collective {
            rank,
            reason: format!("rank out of range for world size {}", self.world_size),
        })?;
        slot.take().ok_or_else(|| OverlapError::Collective {
            rank,
            reason: "rank already claimed from this unique id".into(),
        })
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueId")
            .field("token", &format_args!("{:016x}", self.token))
            .field("world_size", &self.world_size)
            .finish()
    }
}

/// A rank's handle on its communication group.
///
/// Exclusively owned by the rank for the duration of a run and shared by
/// reference with every collective call it makes.
pub struct Communicator {
    token: u64,
    backend: CpuBackend,
}

impl Communicator {
    /// Builds rank `rank`'s communicator from the shared `id`.
    ///
    /// # Errors
    ///
    /// `Collective` if `rank` is outside the world or was already claimed.
    pub fn init(rank: usize, id: &UniqueId) -> Result<Self> {
        let (left_rx, right_tx) = id.claim(rank)?;
        tracing::debug!(rank, world_size = id.world_size, token = id.token, "communicator initialized");
        Ok(Self {
            token: id.token,
            backend: CpuBackend::new(rank, id.world_size, left_rx, right_tx)
                .with_timeout(DEFAULT_COLLECTIVE_TIMEOUT),
        })
    }

    /// Bounds every receive of this communicator's collectives.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.backend = self.backend.with_timeout(timeout);
        self
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn backend(&self) -> &CpuBackend {
        &self.backend
    }
}

impl CollectiveBackend for Communicator {
    fn rank(&self) -> usize {
        self.backend.rank()
    }

    fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>> {
        self.backend.all_reduce_sum(tensor)
    }

    fn all_reduce_region<T: TensorElem>(
        &self,
        buffer: &TileBuffer<T>,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<()> {
        self.backend.all_reduce_region(buffer, rows, cols)
    }
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.backend.rank())
            .field("world_size", &self.backend.world_size())
            .finish()
    }
}
