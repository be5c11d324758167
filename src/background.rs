//! Background execution of long-running computations.
//!
//! The engine itself is synchronous; this module wraps a computation in
//! a worker thread with cooperative cancellation, optional progress
//! reporting, and exactly-once completion callbacks. A UI keeps typing
//! responsive by submitting solves through [`TaskSlot`], which cancels
//! the superseded computation whenever a new one is submitted.

use crate::error::{PriftError, Result};
use crate::invertor::Invertor;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared cancellation flag.
///
/// Cloning yields another view of the same flag. Cancellation is a
/// one-way latch: once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the flag. Running jobs observe it at their next poll.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Plain predicate view of the flag, for solver abort hooks.
    pub fn predicate(&self) -> impl Fn() -> bool + Clone + Send + Sync + 'static {
        let flag = Arc::clone(&self.flag);
        move || flag.load(Ordering::SeqCst)
    }
}

/// Progress sink handed to background jobs.
///
/// `report` forwards the completed fraction to the registered callback
/// and is a no-op when there is none, so jobs report unconditionally.
pub struct Progress {
    callback: Option<Box<dyn Fn(f64) + Send>>,
}

impl Progress {
    pub fn none() -> Self {
        Self { callback: None }
    }

    pub fn with_callback(callback: impl Fn(f64) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Report the completed fraction in [0, 1].
    pub fn report(&self, fraction: f64) {
        if let Some(callback) = &self.callback {
            callback(fraction);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct TaskState {
    finished: Mutex<bool>,
    condvar: Condvar,
}

impl TaskState {
    fn mark_finished(&self) {
        let mut finished = self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *finished = true;
        self.condvar.notify_all();
    }
}

/// Handle to a spawned background computation.
#[derive(Debug)]
pub struct TaskHandle {
    token: CancelToken,
    state: Arc<TaskState>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Request cancellation. The job decides when to stop; completion
    /// still arrives through its callback.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The cancellation token shared with the job.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Whether the job has finished and its callback has run.
    pub fn is_finished(&self) -> bool {
        *self
            .state
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait up to `timeout` for the job to finish. Purely advisory: the
    /// job keeps running either way, and the result still arrives
    /// through its callback.
    pub fn ready(&self, timeout: Duration) -> bool {
        let guard = self
            .state
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (finished, _) = self
            .state
            .condvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *finished
    }

    /// Block until the worker thread exits.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Run `job` on a worker thread without progress reporting.
///
/// Exactly one of the callbacks is invoked, exactly once: `on_complete`
/// with the job's value, or `on_error` with its error. A token that is
/// already cancelled when the worker starts skips the job entirely and
/// reports [`PriftError::Cancelled`].
pub fn spawn<T, J, C, E>(job: J, on_complete: C, on_error: E) -> TaskHandle
where
    T: Send + 'static,
    J: FnOnce(&CancelToken, &Progress) -> Result<T> + Send + 'static,
    C: FnOnce(T) + Send + 'static,
    E: FnOnce(PriftError) + Send + 'static,
{
    spawn_task(job, Progress::none(), on_complete, on_error)
}

/// Run `job` on a worker thread, forwarding its progress reports to
/// `on_progress`.
pub fn spawn_with_progress<T, J, P, C, E>(
    job: J,
    on_progress: P,
    on_complete: C,
    on_error: E,
) -> TaskHandle
where
    T: Send + 'static,
    J: FnOnce(&CancelToken, &Progress) -> Result<T> + Send + 'static,
    P: Fn(f64) + Send + 'static,
    C: FnOnce(T) + Send + 'static,
    E: FnOnce(PriftError) + Send + 'static,
{
    spawn_task(job, Progress::with_callback(on_progress), on_complete, on_error)
}

fn spawn_task<T, J, C, E>(job: J, progress: Progress, on_complete: C, on_error: E) -> TaskHandle
where
    T: Send + 'static,
    J: FnOnce(&CancelToken, &Progress) -> Result<T> + Send + 'static,
    C: FnOnce(T) + Send + 'static,
    E: FnOnce(PriftError) + Send + 'static,
{
    let token = CancelToken::new();
    let state = Arc::new(TaskState::default());

    let worker_token = token.clone();
    let worker_state = Arc::clone(&state);
    let thread = std::thread::spawn(move || {
        run_job(&worker_token, &progress, job, on_complete, on_error);
        worker_state.mark_finished();
    });

    TaskHandle {
        token,
        state,
        thread: Some(thread),
    }
}

fn run_job<T, J, C, E>(token: &CancelToken, progress: &Progress, job: J, on_complete: C, on_error: E)
where
    J: FnOnce(&CancelToken, &Progress) -> Result<T>,
    C: FnOnce(T),
    E: FnOnce(PriftError),
{
    if token.is_cancelled() {
        on_error(PriftError::Cancelled);
        return;
    }
    match job(token, progress) {
        Ok(value) => on_complete(value),
        Err(error) => on_error(error),
    }
}

/// Holder for at most one in-flight computation of a kind.
///
/// Submitting a replacement cancels the previous computation first, so
/// a burst of submissions settles on the latest one.
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Option<TaskHandle>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current computation, if any, then start and hold the
    /// replacement produced by `start`.
    pub fn submit(&mut self, start: impl FnOnce() -> TaskHandle) -> &TaskHandle {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }
        self.current.insert(start())
    }

    /// Cancel and release the current computation, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.cancel();
        }
    }

    pub fn current(&self) -> Option<&TaskHandle> {
        self.current.as_ref()
    }

    /// Whether a computation is still running.
    pub fn is_busy(&self) -> bool {
        self.current.as_ref().map_or(false, |h| !h.is_finished())
    }
}

/// Solve `nfunc` terms on a worker thread against a snapshot of the
/// engine taken at submission time.
///
/// The completion callback receives the solved snapshot, so results
/// always reflect the dataset and configuration as they were when the
/// computation was submitted, regardless of later edits to the caller's
/// engine. Cancellation mid-solve delivers the NaN-flagged partial
/// result through `on_complete`.
pub fn spawn_inversion<C, E>(
    invertor: &Invertor,
    nfunc: usize,
    on_complete: C,
    on_error: E,
) -> TaskHandle
where
    C: FnOnce(Invertor) + Send + 'static,
    E: FnOnce(PriftError) + Send + 'static,
{
    let mut snapshot = invertor.clone();
    spawn(
        move |token, _progress| {
            snapshot.invert_optimize_abortable(nfunc, token.predicate())?;
            Ok(snapshot)
        },
        on_complete,
        on_error,
    )
}
