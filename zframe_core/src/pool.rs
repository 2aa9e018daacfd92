use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError, TryLockError};

use crate::error::{Error, Result};
use crate::session::WorkerSessions;

/// Worker threads plus the codec sessions each of them owns.
///
/// Wraps a `rayon::ThreadPool`. Slot `i` of the session table belongs to
/// worker thread `i`, is created empty with the pool, filled lazily by the
/// first frame that worker handles, and dropped with the pool. One more slot
/// serves the single-threaded path, which runs on the caller's thread.
pub struct ThreadPool {
    inner: rayon::ThreadPool,
    sessions: Vec<Mutex<WorkerSessions>>,
    caller: Mutex<WorkerSessions>,
}

impl ThreadPool {
    /// Spawn a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("zframe-worker-{i}"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        let sessions = (0..inner.current_num_threads())
            .map(|_| Mutex::new(WorkerSessions::new()))
            .collect();
        Ok(Self {
            inner,
            sessions,
            caller: Mutex::new(WorkerSessions::new()),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.inner.current_num_threads()
    }

    /// Run `tasks` copies of `job` on the pool and wait for all of them.
    ///
    /// Jobs may borrow from the caller. Each receives the sessions of the
    /// worker thread it landed on. A panicking job is caught and reported
    /// through its handle; it never takes the pool or the caller down.
    pub fn schedule_all<T, F>(&self, tasks: usize, job: F) -> Vec<TaskHandle<T>>
    where
        F: Fn(&mut WorkerSessions) -> T + Sync,
        T: Send,
    {
        let handles: Vec<TaskHandle<T>> = (0..tasks).map(|_| TaskHandle::new()).collect();
        self.inner.scope(|scope| {
            for handle in &handles {
                let job = &job;
                scope.spawn(move |_| {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| self.with_sessions(job)));
                    handle.fill(outcome);
                });
            }
        });
        handles
    }

    /// Run `job` with the sessions of the current thread: its worker slot on
    /// a pool thread, the caller slot anywhere else. A slot already in use
    /// (a second caller thread) gets throwaway sessions.
    pub(crate) fn with_sessions<T>(&self, job: impl FnOnce(&mut WorkerSessions) -> T) -> T {
        let slot = match self.inner.current_thread_index() {
            Some(i) => self.sessions.get(i),
            None => Some(&self.caller),
        };
        let guard = slot.and_then(|slot| match slot.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        });
        match guard {
            Some(mut sessions) => job(&mut *sessions),
            None => job(&mut WorkerSessions::new()),
        }
    }
}

/// The outcome of one scheduled job.
pub struct TaskHandle<T> {
    outcome: Mutex<Option<std::thread::Result<T>>>,
}

impl<T> TaskHandle<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
        }
    }

    fn fill(&self, outcome: std::thread::Result<T>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    /// The job's return value, or `WorkerPanicked` if it panicked.
    pub fn wait(self) -> Result<T> {
        match self
            .outcome
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            Some(Ok(value)) => Ok(value),
            Some(Err(payload)) => Err(Error::WorkerPanicked(panic_message(payload.as_ref()))),
            None => Err(Error::WorkerPanicked("task never ran".to_string())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
