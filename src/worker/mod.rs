pub mod classify;
pub mod train;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

/// What kind of background job is (or was) running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Classification,
    Training,
}

/// Progress notification emitted while a job runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Images finished out of the batch total.
    Classification { done: usize, total: usize },
    /// Position in the training loop and the last observed batch loss.
    Training { epoch: usize, batch: usize, loss: f32 },
}

/// An image the job skipped instead of aborting the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    pub image: String,
    pub reason: String,
}

/// Terminal state of a job. Cancellation is a distinct outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Payload of the single Finished event every job emits.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub outcome: JobOutcome,
    pub skipped: Vec<SkippedImage>,
}

impl JobReport {
    pub fn completed(skipped: Vec<SkippedImage>) -> Self {
        Self { outcome: JobOutcome::Completed, skipped }
    }

    pub fn cancelled(skipped: Vec<SkippedImage>) -> Self {
        Self { outcome: JobOutcome::Cancelled, skipped }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { outcome: JobOutcome::Failed(reason.into()), skipped: Vec::new() }
    }
}

/// Events cross from the worker thread to the control thread on an ordered
/// channel: zero or more Progress events, then exactly one Finished.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(Progress),
    Finished(JobReport),
}

/// Advisory cancellation flag, checked by jobs at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handle to one spawned job: its event receiver, cancel token and thread.
pub struct JobHandle {
    kind: JobKind,
    cancel: CancelToken,
    events: Receiver<JobEvent>,
    thread: Option<JoinHandle<()>>,
    finished: bool,
}

impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the Finished event has been observed via `poll` or `wait`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain currently pending events without blocking.
    pub fn poll(&mut self) -> Vec<JobEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if matches!(event, JobEvent::Finished(_)) {
                        self.finished = true;
                        self.join();
                    }
                    events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Channel closed without a Finished event: the worker
                    // thread died. Synthesize the terminal event so polling
                    // loops still observe exactly one Finished.
                    if !self.finished {
                        self.finished = true;
                        self.join();
                        events.push(JobEvent::Finished(JobReport::failed(
                            "worker thread terminated unexpectedly",
                        )));
                    }
                    break;
                }
            }
        }
        events
    }

    /// Block until the Finished event arrives, returning its report and any
    /// progress events observed along the way.
    pub fn wait(&mut self) -> (JobReport, Vec<Progress>) {
        let mut progress = Vec::new();
        while let Ok(event) = self.events.recv() {
            match event {
                JobEvent::Progress(p) => progress.push(p),
                JobEvent::Finished(report) => {
                    self.finished = true;
                    self.join();
                    return (report, progress);
                }
            }
        }
        // Channel closed without a Finished event: the worker thread died.
        self.finished = true;
        self.join();
        (JobReport::failed("worker thread terminated unexpectedly"), progress)
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Owns the single active background job.
///
/// Classification and training are mutually exclusive: spawning while a job's
/// Finished event has not yet been observed is rejected with `Error::Busy`.
/// Only the control thread holds the controller, so no locking is needed.
#[derive(Default)]
pub struct JobController {
    active: Option<JobHandle>,
}

impl JobController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.as_ref().is_some_and(|h| !h.finished)
    }

    pub fn active_kind(&self) -> Option<JobKind> {
        self.active.as_ref().filter(|h| !h.finished).map(|h| h.kind)
    }

    /// Spawn `job` on a background thread. The closure reports progress on
    /// the supplied sender; the wrapper emits the single Finished event from
    /// the closure's returned report.
    pub fn spawn<F>(&mut self, kind: JobKind, job: F) -> Result<()>
    where
        F: FnOnce(&Sender<JobEvent>, &CancelToken) -> JobReport + Send + 'static,
    {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let worker_cancel = cancel.clone();
        let thread = thread::spawn(move || {
            let report = job(&tx, &worker_cancel);
            // Receiver may already be dropped; nothing to do about it here.
            let _ = tx.send(JobEvent::Finished(report));
        });
        self.active = Some(JobHandle {
            kind,
            cancel,
            events: rx,
            thread: Some(thread),
            finished: false,
        });
        Ok(())
    }

    /// Request cancellation of the active job, if any.
    pub fn cancel(&self) {
        if let Some(handle) = &self.active {
            handle.cancel();
        }
    }

    /// Drain pending events from the active job.
    pub fn poll(&mut self) -> Vec<JobEvent> {
        match &mut self.active {
            Some(handle) => handle.poll(),
            None => Vec::new(),
        }
    }

    /// Block until the active job finishes; `None` when no job is active.
    pub fn wait_for_finish(&mut self) -> Option<(JobReport, Vec<Progress>)> {
        self.active.as_mut().map(|h| h.wait())
    }
}

/// Helper used by jobs: send a progress event, ignoring a dropped receiver.
pub(crate) fn send_progress(tx: &Sender<JobEvent>, progress: Progress) {
    let _ = tx.send(JobEvent::Progress(progress));
}
