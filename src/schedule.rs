//! Tile visitation schedule.
//!
//! A schedule assigns every tile a visitation rank. Hinted tiles come first,
//! in hint order, so that the tiles which unblock the earliest communication
//! segment are computed before anything else. All other tiles follow in
//! increasing id order.
//!
//! ```rust
//! use flash_overlap::schedule::build_schedule;
//!
//! let schedule = build_schedule(12, &[5, 2]).unwrap();
//! assert_eq!(schedule.rank_of(5), 0);
//! assert_eq!(schedule.rank_of(2), 1);
//! assert_eq!(schedule.rank_of(0), 2);
//! assert_eq!(schedule.tile_at(11), 11);
//! ```

use crate::error::{OverlapError, Result};

const UNASSIGNED: usize = usize::MAX;

/// A permutation of tile ids: original id → visitation rank, and its inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    ranks: Vec<usize>,
    order: Vec<usize>,
}

/// Builds the visitation schedule for `total_tiles` tiles.
///
/// Tile `hint[i]` gets rank `i`; every tile absent from `hint` gets the next
/// free rank in increasing id order.
///
/// # Errors
///
/// Returns `OverlapError::InvalidHint` if a hint entry is out of range or
/// appears twice. Nothing is partially built on failure.
pub fn build_schedule(total_tiles: usize, hint: &[usize]) -> Result<Schedule> {
    let mut ranks = vec![UNASSIGNED; total_tiles];

    for (position, &tile) in hint.iter().enumerate() {
        if tile >= total_tiles {
            return Err(OverlapError::InvalidHint {
                position,
                tile,
                reason: "tile id out of range",
            });
        }
        if ranks[tile] != UNASSIGNED {
            return Err(OverlapError::InvalidHint {
                position,
                tile,
                reason: "tile id repeated",
            });
        }
        ranks[tile] = position;
    }

    let mut next = hint.len();
    for rank in ranks.iter_mut().filter(|rank| **rank == UNASSIGNED) {
        *rank = next;
        next += 1;
    }
    debug_assert_eq!(next, total_tiles);

    let mut order = vec![0; total_tiles];
    for (tile, &rank) in ranks.iter().enumerate() {
        order[rank] = tile;
    }

    Ok(Schedule { ranks, order })
}

impl Schedule {
    /// The identity schedule (no hint).
    pub fn identity(total_tiles: usize) -> Self {
        Self {
            ranks: (0..total_tiles).collect(),
            order: (0..total_tiles).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Visitation rank of original tile id `tile`.
    pub fn rank_of(&self, tile: usize) -> usize {
        self.ranks[tile]
    }

    /// Original tile id visited at `rank`.
    pub fn tile_at(&self, rank: usize) -> usize {
        self.order[rank]
    }

    /// Rank of every tile, indexed by original id.
    ///
    /// Reshaped to `rows × cols` this is the reordered-index matrix handed to
    /// a device kernel that looks up its own position in the visitation order.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Tile ids in visitation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }
}
