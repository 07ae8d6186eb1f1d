//! Runs classification off the sensing loop, one job at a time.
//!
//! A completed trace is handed to a worker thread which normalises it,
//! predicts a spell and runs the feedback handler. While that job is alive
//! further traces are dropped. The in-flight ticket is cleared by a guard
//! when the worker finishes, fails or panics; a ticket older than the
//! watchdog is treated as hung and replaced.

use image::GrayImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ClassifierConfig, RasterConfig};
use crate::inference::{GesturePredictor, PredictError};
use crate::trace;
use crate::types::Spell;

/// Receives each successfully classified spell, on the worker thread.
pub trait ClassificationHandler: Send + Sync {
    fn on_label(&self, spell: Spell);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Classified(Spell),
    Failed(String),
}

pub struct JobHandle {
    pub id: u64,
    done: Receiver<JobReport>,
}

impl JobHandle {
    /// Blocks until the job (including its handler) has finished. `None`
    /// if the worker died without reporting.
    pub fn wait(self) -> Option<JobReport> {
        self.done.recv().ok()
    }

    /// Like `wait`, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobReport> {
        match self.done.recv_timeout(timeout) {
            Ok(report) => Some(report),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

pub enum SubmitOutcome {
    Started(JobHandle),
    /// Another job was still running.
    Dropped,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    id: u64,
    started_at: Instant,
}

/// The busy flag, holding the ticket of the running job.
#[derive(Debug, Default)]
struct InFlight {
    ticket: Mutex<Option<Ticket>>,
}

impl InFlight {
    fn slot(&self) -> MutexGuard<'_, Option<Ticket>> {
        self.ticket.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_acquire(&self, id: u64, now: Instant, watchdog: Duration) -> bool {
        let mut slot = self.slot();
        if let Some(current) = *slot {
            let age = now.saturating_duration_since(current.started_at);
            if age < watchdog {
                return false;
            }
            error!("Classification job {} still running after {:?}; treating it as hung", current.id, age);
        }
        *slot = Some(Ticket { id, started_at: now });
        true
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.map(|t| t.id) == Some(id) {
            *slot = None;
        }
    }

    fn is_busy(&self, now: Instant, watchdog: Duration) -> bool {
        match *self.slot() {
            Some(t) => now.saturating_duration_since(t.started_at) < watchdog,
            None => false,
        }
    }
}

/// Clears the ticket it was issued for, however the worker exits.
struct InFlightGuard {
    flag: Arc<InFlight>,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.release(self.id);
    }
}

pub struct ClassificationDispatcher {
    predictor: Arc<Mutex<Box<dyn GesturePredictor>>>,
    handler: Arc<dyn ClassificationHandler>,
    in_flight: Arc<InFlight>,
    raster: RasterConfig,
    snapshot_path: Option<PathBuf>,
    watchdog: Duration,
    next_id: AtomicU64,
}

impl ClassificationDispatcher {
    pub fn new(
        predictor: Box<dyn GesturePredictor>,
        handler: Arc<dyn ClassificationHandler>,
        raster: RasterConfig,
        classifier: &ClassifierConfig,
    ) -> Self {
        Self {
            predictor: Arc::new(Mutex::new(predictor)),
            handler,
            in_flight: Arc::new(InFlight::default()),
            raster,
            snapshot_path: classifier.snapshot_path.clone(),
            watchdog: classifier.watchdog(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_busy(Instant::now(), self.watchdog)
    }

    /// Starts classifying `mask` (a full-canvas trace raster) unless a job
    /// is already running. Never blocks.
    pub fn submit(&self, mask: GrayImage) -> SubmitOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.in_flight.try_acquire(id, Instant::now(), self.watchdog) {
            info!("Classifier busy; dropping trace");
            return SubmitOutcome::Dropped;
        }

        let guard = InFlightGuard { flag: self.in_flight.clone(), id };
        let predictor = self.predictor.clone();
        let handler = self.handler.clone();
        let raster = self.raster.clone();
        let snapshot = self.snapshot_path.clone();
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new().name(format!("classify-{}", id)).spawn(move || {
            let _guard = guard;
            let report = run_job(id, &mask, &predictor, handler.as_ref(), &raster, snapshot.as_ref());
            let _ = tx.send(report);
        });

        match spawned {
            Ok(_) => SubmitOutcome::Started(JobHandle { id, done: rx }),
            Err(e) => {
                // The closure (and its guard) is dropped, so the ticket is already clear.
                error!("Failed to start classification worker: {}", e);
                SubmitOutcome::Dropped
            }
        }
    }
}

fn run_job(
    id: u64,
    mask: &GrayImage,
    predictor: &Mutex<Box<dyn GesturePredictor>>,
    handler: &dyn ClassificationHandler,
    raster: &RasterConfig,
    snapshot: Option<&PathBuf>,
) -> JobReport {
    let started = Instant::now();
    let normalized = trace::normalize(mask, raster);

    if let Some(path) = snapshot {
        if let Err(e) = normalized.save(path) {
            warn!("Failed to write snapshot {}: {}", path.display(), e);
        }
    }

    // A job abandoned by the watchdog may still hold the model; fail instead of queueing.
    let prediction = match predictor.try_lock() {
        Ok(mut predictor) => predictor.predict(&normalized),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().predict(&normalized),
        Err(TryLockError::WouldBlock) => Err(PredictError::Busy),
    };

    match prediction {
        Ok(spell) => {
            info!("Job {}: recognised {:?} in {:?}", id, spell, started.elapsed());
            handler.on_label(spell);
            debug!("Job {}: feedback finished after {:?}", id, started.elapsed());
            JobReport::Classified(spell)
        }
        Err(e) => {
            error!("Job {}: classification failed: {}", id, e);
            JobReport::Failed(e.to_string())
        }
    }
}
