//! Asynchronous in-order execution stream.
//!
//! A stream owns one worker thread fed through a `crossbeam` channel. Jobs
//! retire strictly in submission order. The first failing job poisons the
//! stream: its error is kept until taken, and every job queued behind it is
//! skipped so no later tile is reported complete on top of a missing one.

use crate::error::{OverlapError, Result};
use crate::poll::{PollOptions, PollOutcome, poll_until};
use crossbeam::channel::{Sender, unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Default)]
struct StreamState {
    pending: AtomicUsize,
    failed: AtomicBool,
    error: Mutex<Option<OverlapError>>,
}

impl StreamState {
    fn record(&self, err: OverlapError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
        self.failed.store(true, Ordering::Release);
    }
}

pub struct DeviceStream {
    name: String,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    state: Arc<StreamState>,
}

impl DeviceStream {
    /// Starts a stream whose worker thread is named `name`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();
        let state = Arc::new(StreamState::default());

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in receiver {
                    if !worker_state.failed.load(Ordering::Acquire) {
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                        match outcome {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => worker_state.record(err),
                            Err(_) => worker_state
                                .record(OverlapError::WorkerPanicked(thread_name())),
                        }
                    }
                    worker_state.pending.fetch_sub(1, Ordering::AcqRel);
                }
            })
            .map_err(|e| OverlapError::StreamUnavailable {
                stream: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job`. Returns immediately.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or_else(|| self.unavailable("stream closed"))?;
        self.state.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(job)).is_err() {
            self.state.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(self.unavailable("worker exited"));
        }
        Ok(())
    }

    /// Jobs submitted but not yet retired.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// True once a job failed and until [`reset`](Self::reset).
    pub fn has_failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }

    /// Takes the first recorded failure. The stream stays failed.
    pub fn take_error(&self) -> Option<OverlapError> {
        if !self.has_failed() {
            return None;
        }
        self.state
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Waits until every submitted job retired, then reports the first failure if any.
    pub fn synchronize(&self, options: &PollOptions) -> Result<()> {
        match poll_until(options, || Ok(self.is_idle()))? {
            PollOutcome::Ready => {}
            PollOutcome::TimedOut(waited) => {
                return Err(OverlapError::SynchronizationStall {
                    waiting_for: format!("stream {}", self.name),
                    waited,
                });
            }
        }
        self.check()
    }

    /// Non-blocking failure probe: `Err` with the recorded failure once the
    /// stream has failed.
    pub fn check(&self) -> Result<()> {
        if !self.has_failed() {
            return Ok(());
        }
        Err(self
            .take_error()
            .unwrap_or_else(|| self.unavailable("stream failed earlier")))
    }

    /// Waits for the queue to drain and clears any failure, readying the stream
    /// for a fresh run.
    pub fn reset(&self, options: &PollOptions) -> Result<()> {
        if let PollOutcome::TimedOut(waited) = poll_until(options, || Ok(self.is_idle()))? {
            return Err(OverlapError::SynchronizationStall {
                waiting_for: format!("stream {}", self.name),
                waited,
            });
        }
        self.state
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.failed.store(false, Ordering::Release);
        Ok(())
    }

    fn unavailable(&self, reason: &str) -> OverlapError {
        OverlapError::StreamUnavailable {
            stream: self.name.clone(),
            reason: reason.into(),
        }
    }
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("stream").to_string()
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue drains.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(stream = %self.name, "stream worker panicked during shutdown");
            }
        }
    }
}
