//! Spawning one worker per rank.

use crate::config::LaunchOptions;
use crate::distributed::{Communicator, UniqueId};
use crate::error::{OverlapError, Result};
use std::thread;

/// Runs `f` once per rank on its own named thread (`rank-{r}`) and collects the
/// per-rank results in rank order.
///
/// Every worker gets its own [`Communicator`], built from one shared
/// [`UniqueId`]. A worker's communicator is dropped when `f` returns, so a rank
/// that fails early disconnects its peers instead of leaving them blocked.
///
/// # Errors
///
/// `InsufficientDevices` if `world_size` is below `options.min_world_size`.
/// Otherwise the first failing rank's error; a peer's collective failure is
/// only reported when no rank failed for another reason, since it is usually
/// the echo of that other failure.
pub fn spawn_ranks<R, F>(world_size: usize, options: &LaunchOptions, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Communicator) -> Result<R> + Sync,
{
    if world_size < options.min_world_size.max(1) {
        return Err(OverlapError::InsufficientDevices {
            required: options.min_world_size.max(1),
            available: world_size,
        });
    }

    let id = UniqueId::new(world_size);
    tracing::debug!(world_size, token = id.token(), "spawning ranks");

    let results: Vec<Result<R>> = thread::scope(|scope| {
        let handles = (0..world_size)
            .map(|rank| {
                let id = &id;
                let f = &f;
                thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        let comm = Communicator::init(rank, id)?
                            .with_timeout(options.collective_timeout);
                        f(comm)
                    })
                    .map_err(|e| OverlapError::WorkerPanicked(format!("rank-{rank}: {e}")))
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle?
                    .join()
                    .map_err(|_| OverlapError::WorkerPanicked(format!("rank-{rank}")))?
            })
            .collect()
    });

    let mut values = Vec::with_capacity(world_size);
    let mut collective = None;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(err @ OverlapError::Collective { .. }) => {
                tracing::debug!(rank, error = %err, "rank failed in a collective");
                collective.get_or_insert(err);
            }
            Err(err) => {
                tracing::warn!(rank, error = %err, "rank failed");
                return Err(err);
            }
        }
    }
    match collective {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
