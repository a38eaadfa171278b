//! Background execution of PCA and correlation jobs.
//!
//! A [`JobRunner`] owns one long-lived background context per [`JobKind`],
//! created lazily on the first submission of that kind. Each context is a
//! single-threaded rayon pool, so jobs of one kind run to completion one at a
//! time in submission order while jobs of different kinds run in parallel.
//!
//! Submitting returns a [`JobHandle`]. Its outcome is awaited asynchronously,
//! progress is published through a `watch` channel, and [`JobHandle::cancel`]
//! detaches the caller immediately: the awaiting code observes
//! [`JobError::Cancelled`] and never a later result. The cancel flag is shared
//! with the context as well, so a queued job is skipped and a running engine
//! stops at its next checkpoint.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};

use crate::correlation::{CorrelationEngine, CorrelationMatrix, CorrelationOptions};
use crate::error::{ComputeError, JobError};
use crate::monitor::ComputeMonitor;
use crate::pca::{PcaEngine, PcaOptions, PcaResult};
use crate::stats::Matrix;

// --- Identifiers ---

/// Kind of job, and with it the background context that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Pca,
    Corr,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Pca, JobKind::Corr];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Pca => "pca",
            JobKind::Corr => "corr",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pca" => Ok(JobKind::Pca),
            "corr" => Ok(JobKind::Corr),
            other => Err(JobError::UnknownKind(other.to_string())),
        }
    }
}

/// Unique (per runner) job identifier, e.g. `pca_3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Payloads and outputs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaJob {
    pub matrix: Matrix,
    #[serde(default)]
    pub options: PcaOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationJob {
    pub rows: Matrix,
    /// Identifier of each matrix column, in order.
    pub columns: Vec<String>,
    #[serde(default)]
    pub options: CorrelationOptions,
}

/// Input of a job. Moved into the background context on dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum JobPayload {
    Pca(PcaJob),
    Corr(CorrelationJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Pca(_) => JobKind::Pca,
            JobPayload::Corr(_) => JobKind::Corr,
        }
    }

    fn validate(&self) -> Result<(), ComputeError> {
        match self {
            JobPayload::Pca(job) => job.options.validate(),
            JobPayload::Corr(job) => job.options.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "lowercase")]
pub enum JobOutput {
    Pca(PcaResult),
    Corr(CorrelationMatrix),
}

impl JobOutput {
    pub fn kind(&self) -> JobKind {
        match self {
            JobOutput::Pca(_) => JobKind::Pca,
            JobOutput::Corr(_) => JobKind::Corr,
        }
    }

    pub fn into_pca(self) -> Option<PcaResult> {
        match self {
            JobOutput::Pca(result) => Some(result),
            JobOutput::Corr(_) => None,
        }
    }

    pub fn into_correlation(self) -> Option<CorrelationMatrix> {
        match self {
            JobOutput::Corr(matrix) => Some(matrix),
            JobOutput::Pca(_) => None,
        }
    }
}

pub type JobOutcome = Result<JobOutput, JobError>;

// --- Cancellation ---

#[derive(Debug, Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

/// Cloneable cancel switch for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<CancelState>);

impl CancelHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Detaches every awaiting caller and asks the background context to stop.
    /// Idempotent.
    pub fn cancel(&self) {
        if !self.0.flag.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel is not missed.
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// --- Handle ---

/// Caller side of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    cancel: CancelHandle,
    progress: watch::Receiver<f64>,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cancel switch usable while [`JobHandle::outcome`] is being awaited.
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latest reported completion fraction. Coarse and best-effort: fast jobs
    /// may jump straight from 0 to 1.
    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }

    pub fn progress_watch(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Waits for the job's single outcome.
    ///
    /// Cancellation takes precedence: once the handle is cancelled this
    /// resolves to [`JobError::Cancelled`] even if a result has already
    /// arrived.
    pub async fn outcome(self) -> JobOutcome {
        let JobHandle {
            id, cancel, outcome, ..
        } = self;
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            received = outcome => {
                if cancel.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                received.unwrap_or_else(|_| Err(JobError::Disconnected(id)))
            }
        }
    }
}

// --- Background side ---

struct JobTicket {
    id: JobId,
    payload: JobPayload,
    cancel: CancelHandle,
    progress: watch::Sender<f64>,
    outcome: oneshot::Sender<JobOutcome>,
    corr_progress_stride: usize,
}

struct JobMonitor<'a> {
    cancel: &'a CancelHandle,
    progress: &'a watch::Sender<f64>,
}

impl ComputeMonitor for JobMonitor<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report_progress(&self, fraction: f64) {
        self.progress.send_replace(fraction.clamp(0.0, 1.0));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "background computation panicked".to_string()
    }
}

fn execute(payload: JobPayload, monitor: &dyn ComputeMonitor, corr_progress_stride: usize) -> JobOutcome {
    payload.validate()?;
    match payload {
        JobPayload::Pca(job) => {
            let result = PcaEngine::new(job.options).fit_monitored(&job.matrix, monitor)?;
            Ok(JobOutput::Pca(result))
        }
        JobPayload::Corr(job) => {
            let matrix = CorrelationEngine::new(job.options)
                .with_progress_stride(corr_progress_stride)
                .compute_monitored(&job.rows, &job.columns, monitor)?;
            Ok(JobOutput::Corr(matrix))
        }
    }
}

/// Runs `execute`, turning a panic inside the engines into `JobError::Failed`.
fn execute_guarded(payload: JobPayload, monitor: &dyn ComputeMonitor, corr_progress_stride: usize) -> JobOutcome {
    panic::catch_unwind(AssertUnwindSafe(|| execute(payload, monitor, corr_progress_stride)))
        .unwrap_or_else(|panic| Err(JobError::Failed(panic_message(panic.as_ref()))))
}

fn run_ticket(ticket: JobTicket) {
    let JobTicket {
        id,
        payload,
        cancel,
        progress,
        outcome,
        corr_progress_stride,
    } = ticket;

    if cancel.is_cancelled() {
        debug!("Job {} was cancelled while queued; skipping it.", id);
        let _ = outcome.send(Err(JobError::Cancelled));
        return;
    }

    let monitor = JobMonitor {
        cancel: &cancel,
        progress: &progress,
    };
    let start = Instant::now();
    let result = execute_guarded(payload, &monitor, corr_progress_stride);

    match &result {
        Ok(_) => {
            progress.send_replace(1.0);
            info!("Job {} completed in {:?}", id, start.elapsed());
        }
        Err(JobError::Cancelled) => info!("Job {} stopped after cancellation ({:?})", id, start.elapsed()),
        Err(err) => warn!("Job {} failed: {}", id, err),
    }

    if outcome.send(result).is_err() {
        debug!("Job {} finished with no caller attached.", id);
    }
}

/// One long-lived, single-threaded execution context.
#[derive(Debug)]
struct BackgroundContext {
    kind: JobKind,
    pool: ThreadPool,
}

impl BackgroundContext {
    fn start(kind: JobKind, thread_name_prefix: &str) -> Result<Self, JobError> {
        let thread_name = format!("{thread_name_prefix}-{kind}");
        let pool = ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(move |_| thread_name.clone())
            .build()
            .map_err(|e| JobError::ContextUnavailable {
                kind,
                reason: e.to_string(),
            })?;
        info!("Started background context for {} jobs", kind);
        Ok(Self { kind, pool })
    }

    /// Queues the ticket behind every job already dispatched to this context.
    fn dispatch(&self, ticket: JobTicket) {
        debug!("Dispatching job {} to the {} context", ticket.id, self.kind);
        self.pool.spawn_fifo(move || run_ticket(ticket));
    }
}

// --- Registry ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunnerConfig {
    /// Background threads are named `<prefix>-<kind>`.
    pub thread_name_prefix: String,
    /// Correlation jobs report progress every this many matrix rows.
    pub corr_progress_stride: usize,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "omics-compute".to_string(),
            corr_progress_stride: 4,
        }
    }
}

/// Registry of background contexts, keyed by job kind.
///
/// Contexts are created on first use and live until [`JobRunner::shutdown`]
/// or drop. Shutting down does not abort work already dispatched: queued jobs
/// drain (cancelled ones are skipped) and their outcomes are still delivered.
#[derive(Debug)]
pub struct JobRunner {
    config: JobRunnerConfig,
    /// `None` once shut down.
    contexts: Mutex<Option<HashMap<JobKind, BackgroundContext>>>,
    next_id: AtomicU64,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(JobRunnerConfig::default())
    }
}

impl JobRunner {
    pub fn new(config: JobRunnerConfig) -> Self {
        Self {
            config,
            contexts: Mutex::new(Some(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &JobRunnerConfig {
        &self.config
    }

    fn contexts(&self) -> MutexGuard<'_, Option<HashMap<JobKind, BackgroundContext>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits `payload` as a job of the named kind.
    ///
    /// Unknown kinds and payloads of the wrong kind are rejected here, before
    /// any context is created or any work is dispatched.
    pub fn submit(&self, kind: &str, payload: JobPayload) -> Result<JobHandle, JobError> {
        let kind: JobKind = kind.parse()?;
        self.submit_kind(kind, payload)
    }

    pub fn submit_kind(&self, kind: JobKind, payload: JobPayload) -> Result<JobHandle, JobError> {
        if payload.kind() != kind {
            return Err(JobError::KindMismatch {
                kind,
                payload: payload.kind(),
            });
        }

        let mut guard = self.contexts();
        let contexts = guard.as_mut().ok_or(JobError::ShutDown)?;
        let context = match contexts.entry(kind) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(BackgroundContext::start(kind, &self.config.thread_name_prefix)?)
            }
        };

        let id = JobId(format!("{}_{}", kind, self.next_id.fetch_add(1, Ordering::Relaxed)));
        let cancel = CancelHandle::new();
        let (progress_tx, progress_rx) = watch::channel(0.0);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        context.dispatch(JobTicket {
            id: id.clone(),
            payload,
            cancel: cancel.clone(),
            progress: progress_tx,
            outcome: outcome_tx,
            corr_progress_stride: self.config.corr_progress_stride,
        });

        Ok(JobHandle {
            id,
            kind,
            cancel,
            progress: progress_rx,
            outcome: outcome_rx,
        })
    }

    pub fn submit_pca(&self, matrix: Matrix, options: PcaOptions) -> Result<JobHandle, JobError> {
        self.submit_kind(JobKind::Pca, JobPayload::Pca(PcaJob { matrix, options }))
    }

    pub fn submit_corr(&self, job: CorrelationJob) -> Result<JobHandle, JobError> {
        self.submit_kind(JobKind::Corr, JobPayload::Corr(job))
    }

    /// Kinds whose background context is currently running.
    pub fn active_kinds(&self) -> Vec<JobKind> {
        let guard = self.contexts();
        let mut kinds: Vec<JobKind> = guard
            .as_ref()
            .map(|contexts| contexts.keys().copied().collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }

    pub fn is_shut_down(&self) -> bool {
        self.contexts().is_none()
    }

    /// Releases every background context. Later submissions fail with
    /// [`JobError::ShutDown`].
    pub fn shutdown(&self) {
        let released = self.contexts().take();
        if let Some(contexts) = released {
            if !contexts.is_empty() {
                info!("Shutting down {} background context(s)", contexts.len());
            }
        }
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
