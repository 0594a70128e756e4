//! Periodic scheduler with at most one outstanding run.
//!
//! A tick that fires while the previous run is still in progress is skipped
//! and counted instead of queued, so slow links never build a backlog of
//! reads.

use log::trace;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

/// Run statistics of a [`Periodic`] task.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct TickStats {
    /// Number of runs that finished.
    pub completed: u64,
    /// Number of ticks skipped because a run was still in progress.
    pub skipped: u64,
}

#[derive(Default, Debug)]
struct Counters {
    completed: AtomicU64,
    skipped: AtomicU64,
}

/// Handle of a periodically running job.
///
/// The job is stopped, including a run in progress, when the handle is
/// dropped.
#[derive(Debug)]
pub struct Periodic {
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl Periodic {
    /// Spawns the job, running it immediately and then once per period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let counters = Arc::new(Counters::default());
        let task = {
            let counters = counters.clone();

            tokio::spawn(async move {
                let mut interval = time::interval(period);
                let mut running: Option<Pin<Box<Fut>>> = None;

                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if running.is_some() {
                                let skipped = counters.skipped.fetch_add(1, Ordering::Relaxed) + 1;

                                trace!("Previous run still in progress, skipped {skipped} ticks");
                            } else {
                                running = Some(Box::pin(job()));
                            }
                        }
                        () = async {
                            match running.as_mut() {
                                Some(run) => run.await,
                                None => std::future::pending().await,
                            }
                        } => {
                            running = None;
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        };

        Self { task, counters }
    }

    /// Returns a snapshot of the run statistics.
    #[must_use]
    pub fn stats(&self) -> TickStats {
        TickStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` once the job was stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.task.abort();
    }
}
