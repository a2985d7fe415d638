//! Bounded dispatcher for action dialect invocations
//!
//! Every `act()` call queues a (dialect, delegate) pair. Workers are spawned
//! lazily up to `max_workers`; each one pops the queue head under the lock,
//! runs the delegate with the lock released, and exits once the queue is
//! empty. Spawning and exiting both happen under the queue lock, so the cap
//! is exact.
//!
//! If a worker thread cannot be started and no other worker is alive,
//! `do_action` takes its invocation back out of the queue and returns
//! `false`. Work left queued after a panicking worker's replacement failed to
//! start is picked up by the worker the next `do_action` starts.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::io;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::action::ActionDialect;
use super::{AnyDialect, DialectFactory};

/// Callback run by a worker for one action invocation
pub trait ActionDelegate: Send + Sync {
    /// Handle the action
    fn do_action(&self, dialect: ActionDialect);
}

impl<F> ActionDelegate for F
where
    F: Fn(ActionDialect) + Send + Sync,
{
    fn do_action(&self, dialect: ActionDialect) {
        self(dialect)
    }
}

struct Invocation {
    dialect: ActionDialect,
    delegate: Arc<dyn ActionDelegate>,
}

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<Invocation>,
    workers: usize,
    shutdown: bool,
}

struct Dispatcher {
    state: Mutex<DispatchState>,
    idle: Condvar,
    max_workers: usize,
    worker_seq: AtomicUsize,
    #[cfg(test)]
    refuse_spawns: AtomicBool,
}

impl Dispatcher {
    /// Start a worker. Caller holds the state lock and has already counted it.
    ///
    /// On failure the count is given back and `false` returned.
    fn spawn_worker(self: &Arc<Self>, state: &mut DispatchState) -> bool {
        let id = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Arc::clone(self);
        let spawned = if self.refuse_spawn() {
            Err(io::Error::other("worker spawn refused"))
        } else {
            std::thread::Builder::new()
                .name(format!("action-worker-{id}"))
                .spawn(move || dispatcher.run_worker())
        };

        match spawned {
            Ok(_) => true,
            Err(err) => {
                state.workers -= 1;
                tracing::error!(
                    error = %err,
                    workers = state.workers,
                    pending = state.queue.len(),
                    "failed to spawn action worker"
                );
                if state.workers == 0 {
                    self.idle.notify_all();
                }
                false
            }
        }
    }

    #[cfg(not(test))]
    fn refuse_spawn(&self) -> bool {
        false
    }

    #[cfg(test)]
    fn refuse_spawn(&self) -> bool {
        self.refuse_spawns.load(Ordering::SeqCst)
    }

    fn run_worker(self: Arc<Self>) {
        let _exit = WorkerExit {
            dispatcher: Arc::clone(&self),
        };

        loop {
            let invocation = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(invocation) => invocation,
                    None => {
                        state.workers -= 1;
                        if state.workers == 0 {
                            self.idle.notify_all();
                        }
                        return;
                    }
                }
            };

            invocation.delegate.do_action(invocation.dialect);
        }
    }
}

/// Accounts for a worker whose delegate panicked
struct WorkerExit {
    dispatcher: Arc<Dispatcher>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }

        let mut state = self.dispatcher.state.lock();
        tracing::error!(
            pending = state.queue.len(),
            "action delegate panicked, worker terminated"
        );
        state.workers -= 1;
        if !state.queue.is_empty() && !state.shutdown {
            state.workers += 1;
            self.dispatcher.spawn_worker(&mut state);
        } else if state.workers == 0 {
            self.dispatcher.idle.notify_all();
        }
    }
}

/// Factory and worker pool for [`ActionDialect`]
pub struct ActionDialectFactory {
    dispatcher: Arc<Dispatcher>,
}

impl ActionDialectFactory {
    /// Default worker cap
    pub const DEFAULT_MAX_WORKERS: usize = 32;

    /// Create a dispatcher with at most `max_workers` concurrent workers
    pub fn new(max_workers: usize) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                state: Mutex::new(DispatchState::default()),
                idle: Condvar::new(),
                max_workers: max_workers.max(1),
                worker_seq: AtomicUsize::new(0),
                #[cfg(test)]
                refuse_spawns: AtomicBool::new(false),
            }),
        }
    }

    /// Worker cap
    pub fn max_workers(&self) -> usize {
        self.dispatcher.max_workers
    }

    /// Queue an invocation, starting a worker if the cap allows
    ///
    /// Returns `false` once the factory has been shut down, or when no
    /// worker is alive and a new one could not be started. A rejected
    /// invocation is not kept.
    pub fn do_action(&self, dialect: ActionDialect, delegate: Arc<dyn ActionDelegate>) -> bool {
        let mut state = self.dispatcher.state.lock();
        if state.shutdown {
            tracing::warn!(action = %dialect.action(), "action factory is shut down, dropping invocation");
            return false;
        }

        state.queue.push_back(Invocation { dialect, delegate });
        if state.workers < self.dispatcher.max_workers {
            state.workers += 1;
            if !self.dispatcher.spawn_worker(&mut state) && state.workers == 0 {
                if let Some(rejected) = state.queue.pop_back() {
                    tracing::warn!(
                        action = %rejected.dialect.action(),
                        "no action worker available, invocation rejected"
                    );
                }
                return false;
            }
        }
        true
    }

    /// Invocations waiting for a worker
    pub fn pending(&self) -> usize {
        self.dispatcher.state.lock().queue.len()
    }

    /// Workers currently alive
    pub fn active_workers(&self) -> usize {
        self.dispatcher.state.lock().workers
    }

    /// Block until the queue is empty and every worker has exited
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.dispatcher.state.lock();
        while state.workers > 0 || !state.queue.is_empty() {
            if self.dispatcher.idle.wait_until(&mut state, deadline).timed_out() {
                return state.workers == 0 && state.queue.is_empty();
            }
        }
        true
    }

    /// Drop pending invocations and refuse new ones
    ///
    /// Delegates already running are not interrupted.
    pub fn shutdown(&self) {
        let mut state = self.dispatcher.state.lock();
        state.shutdown = true;
        let dropped = state.queue.len();
        state.queue.clear();
        tracing::info!(dropped, "action factory shut down");
        if state.workers == 0 {
            self.dispatcher.idle.notify_all();
        }
    }
}

impl Default for ActionDialectFactory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_WORKERS)
    }
}

impl DialectFactory for ActionDialectFactory {
    fn name(&self) -> &str {
        ActionDialect::NAME
    }

    fn create(&self, tracker: &str) -> AnyDialect {
        AnyDialect::Action(ActionDialect::new(tracker))
    }

    fn shutdown(&self) {
        ActionDialectFactory::shutdown(self);
    }
}
