//! Parallel core-point classification.
//!
//! A producer feeds sample indices into a bounded queue shared by a fixed
//! pool of workers. Each worker computes the neighborhood of the samples it
//! pulls and sends the result to the aggregating thread over a channel, so
//! no map is ever written concurrently. Dropping the producer side of the
//! queue tells the workers no more work is coming; the enclosing thread
//! scope is the barrier after which the classification is complete.
//!
//! The first worker error raises a shared abort flag; the producer and the
//! remaining workers stop at their next check and the error is returned.
//! Raising the caller's cancel flag stops the run the same way but yields
//! [`RunStatus::Cancelled`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use photoncluster_core::{Error, Point2D, Result, RunStatus};

use crate::kdistance::panic_message;
use crate::neighbors::{NeighborSearch, NeighborSet};

/// Longest a worker or the producer waits before re-checking the flags.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Neighborhood of a core point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreRecord {
    /// Samples inside the neighborhood, the core point excluded.
    pub neighbors: Vec<Point2D>,
    /// Best-fit sector for elliptical neighborhoods.
    pub sector: Option<usize>,
}

/// Core points with their neighborhoods, and provisional outliers.
///
/// Every classified sample is in exactly one of the two collections.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    core: HashMap<Point2D, CoreRecord>,
    outliers: HashSet<Point2D>,
}

impl Classification {
    /// Core points and their neighborhoods.
    #[must_use]
    pub fn core(&self) -> &HashMap<Point2D, CoreRecord> {
        &self.core
    }

    /// Samples whose neighborhood is too sparse.
    #[must_use]
    pub fn outliers(&self) -> &HashSet<Point2D> {
        &self.outliers
    }

    /// Neighborhood of `point` if it is a core point.
    #[must_use]
    pub fn core_record(&self, point: &Point2D) -> Option<&CoreRecord> {
        self.core.get(point)
    }

    /// Returns true if `point` was classified as core.
    #[must_use]
    pub fn is_core(&self, point: &Point2D) -> bool {
        self.core.contains_key(point)
    }

    /// Number of classified samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len() + self.outliers.len()
    }

    /// Returns true if nothing was classified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits into core points and outliers.
    #[must_use]
    pub fn into_parts(self) -> (HashMap<Point2D, CoreRecord>, HashSet<Point2D>) {
        (self.core, self.outliers)
    }

    fn record(&mut self, point: Point2D, neighbors: NeighborSet, min_pts: usize) {
        if neighbors.inclusive_len() >= min_pts {
            self.core.insert(
                point,
                CoreRecord {
                    neighbors: neighbors.points,
                    sector: neighbors.sector,
                },
            );
        } else {
            self.outliers.insert(point);
        }
    }
}

enum WorkerMessage {
    Classified { index: usize, neighbors: NeighborSet },
    Failed(Error),
}

/// Raises the abort flag if the owning worker unwinds.
struct AbortOnPanic<'a>(&'a AtomicBool);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

/// Splits samples into core points and provisional outliers.
pub struct CorePointClassifier<'a> {
    search: NeighborSearch<'a>,
    min_pts: usize,
    parallelism: usize,
    queue_capacity: usize,
}

impl<'a> CorePointClassifier<'a> {
    /// Creates a classifier.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `min_pts`, `parallelism` or
    /// `queue_capacity` is zero.
    pub fn new(
        search: NeighborSearch<'a>,
        min_pts: usize,
        parallelism: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        if min_pts == 0 {
            return Err(Error::invalid_config("min_pts", "must be > 0"));
        }
        if parallelism == 0 {
            return Err(Error::invalid_config("parallelism", "must be > 0"));
        }
        if queue_capacity == 0 {
            return Err(Error::invalid_config("queue_capacity", "must be > 0"));
        }
        Ok(Self {
            search,
            min_pts,
            parallelism,
            queue_capacity,
        })
    }

    /// Classifies every sample of `points`.
    ///
    /// Samples are expected to be distinct; a repeated sample is classified
    /// once.
    ///
    /// # Errors
    /// Returns the first worker error, or [`Error::WorkerPanicked`].
    pub fn classify(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Classification>> {
        if cancel.load(Ordering::Relaxed) {
            return Ok(RunStatus::Cancelled);
        }
        if points.is_empty() {
            return Ok(RunStatus::Completed(Classification::default()));
        }

        let workers = self.parallelism.min(points.len());
        let abort = AtomicBool::new(false);
        let (task_tx, task_rx) = mpsc::sync_channel::<usize>(self.queue_capacity);
        let task_rx = Mutex::new(task_rx);
        let (result_tx, result_rx) = mpsc::channel::<WorkerMessage>();

        let mut aggregate = Aggregate::new(points, self.min_pts);

        let panics: Vec<String> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let result_tx = result_tx.clone();
                    let task_rx = &task_rx;
                    let abort = &abort;
                    scope.spawn(move || {
                        let _guard = AbortOnPanic(abort);
                        self.run_worker(worker, points, task_rx, &result_tx, cancel, abort);
                    })
                })
                .collect();
            drop(result_tx);

            Self::feed(points.len(), task_tx, &result_rx, &mut aggregate, cancel, &abort);

            // Workers drain the queue and hang up; the loop ends when the
            // last result sender is gone.
            for message in result_rx.iter() {
                aggregate.accept(message, &abort);
            }

            handles
                .into_iter()
                .filter_map(|handle| handle.join().err())
                .map(|payload| panic_message(&*payload))
                .collect()
        });

        if let Some(error) = aggregate.error {
            log::warn!("classification aborted: {error}");
            return Err(error);
        }
        if let Some(message) = panics.into_iter().next() {
            log::warn!("classification worker panicked: {message}");
            return Err(Error::WorkerPanicked(message));
        }
        if cancel.load(Ordering::Relaxed) {
            log::info!(
                "classification cancelled after {} of {} samples",
                aggregate.classification.len(),
                points.len()
            );
            return Ok(RunStatus::Cancelled);
        }

        let classification = aggregate.classification;
        log::debug!(
            "classified {} samples: {} core, {} provisional outliers",
            points.len(),
            classification.core.len(),
            classification.outliers.len()
        );
        Ok(RunStatus::Completed(classification))
    }

    /// Pushes every index into the queue. While the queue is full the
    /// producer drains results instead, so a full queue never hides a
    /// cancellation or a dead pool.
    fn feed(
        count: usize,
        task_tx: mpsc::SyncSender<usize>,
        result_rx: &Receiver<WorkerMessage>,
        aggregate: &mut Aggregate<'_>,
        cancel: &AtomicBool,
        abort: &AtomicBool,
    ) {
        'tasks: for index in 0..count {
            let mut task = index;
            loop {
                if cancel.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                    break 'tasks;
                }
                match task_tx.try_send(task) {
                    Ok(()) => break,
                    Err(TrySendError::Full(rejected)) => {
                        task = rejected;
                        match result_rx.recv_timeout(POLL_INTERVAL) {
                            Ok(message) => aggregate.accept(message, abort),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break 'tasks,
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break 'tasks,
                }
            }
        }
        // Dropping the sender signals completion to the workers.
        drop(task_tx);
        log::trace!("producer finished");
    }

    fn run_worker(
        &self,
        worker: usize,
        points: &[Point2D],
        task_rx: &Mutex<Receiver<usize>>,
        result_tx: &Sender<WorkerMessage>,
        cancel: &AtomicBool,
        abort: &AtomicBool,
    ) {
        let mut processed = 0usize;
        loop {
            if cancel.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                break;
            }
            let next = task_rx.lock().recv_timeout(POLL_INTERVAL);
            let index = match next {
                Ok(index) => index,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let center = &points[index];
            let message = match self.search.neighbors(center, points) {
                Ok(neighbors) => WorkerMessage::Classified { index, neighbors },
                Err(error) => {
                    abort.store(true, Ordering::SeqCst);
                    WorkerMessage::Failed(Error::Worker {
                        point: *center,
                        message: error.to_string(),
                    })
                }
            };
            let failed = matches!(message, WorkerMessage::Failed(_));
            if result_tx.send(message).is_err() || failed {
                break;
            }
            processed += 1;
        }
        log::trace!("worker {worker} exited after {processed} samples");
    }
}

/// Result side of the run, owned by the aggregating thread.
struct Aggregate<'p> {
    points: &'p [Point2D],
    min_pts: usize,
    classification: Classification,
    error: Option<Error>,
}

impl<'p> Aggregate<'p> {
    fn new(points: &'p [Point2D], min_pts: usize) -> Self {
        Self {
            points,
            min_pts,
            classification: Classification::default(),
            error: None,
        }
    }

    fn accept(&mut self, message: WorkerMessage, abort: &AtomicBool) {
        match message {
            WorkerMessage::Classified { index, neighbors } => {
                self.classification
                    .record(self.points[index], neighbors, self.min_pts);
            }
            WorkerMessage::Failed(error) => {
                abort.store(true, Ordering::SeqCst);
                if self.error.is_none() {
                    self.error = Some(error);
                }
            }
        }
    }
}
