// src/engine/debounce.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{self, Poll};

use tokio::sync::oneshot;
use tracing::debug;

type RunFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type RunFn = Box<dyn Fn() -> RunFuture + Send + Sync>;

/// Coalescing state, guarded by the scheduler's mutex.
///
/// Vocabulary:
/// - `active`: a reevaluation has been requested and not yet served by a run
///   that fired after the request.
/// - `running`: a run task exists (scheduled or executing).
/// - `fired`: the run task has passed its zero-delay hop and is executing the
///   body; requests arriving now belong to the trailing run.
#[derive(Default)]
struct DebounceState {
    active: bool,
    running: bool,
    fired: bool,
    /// Waiters for the run that has not fired yet (or is executing).
    current: Vec<oneshot::Sender<()>>,
    /// Waiters for the trailing run queued behind the executing one.
    trailing: Vec<oneshot::Sender<()>>,
}

struct SchedInner {
    run: RunFn,
    state: Mutex<DebounceState>,
}

impl SchedInner {
    fn state(&self) -> MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collapses bursts of reevaluation requests into single trailing executions.
///
/// For any number of [`DebounceScheduler::start`] calls issued before and
/// during a run, at most one additional run is ever queued: never two, and
/// never zero once requested. Calls issued before a scheduled run fires all
/// join that run, so N rapid requests produce exactly one execution.
///
/// Runs are spawned onto the tokio runtime with a zero-delay hop
/// (`yield_now`), so the body never executes reentrantly on the caller's
/// stack. `start` must therefore be called from within a runtime.
#[derive(Clone)]
pub struct DebounceScheduler {
    inner: Arc<SchedInner>,
}

impl DebounceScheduler {
    /// Create a scheduler around the given run body.
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run: RunFn = Box::new(move || Box::pin(run()) as RunFuture);
        Self {
            inner: Arc::new(SchedInner {
                run,
                state: Mutex::new(DebounceState::default()),
            }),
        }
    }

    /// Request a run.
    ///
    /// Returns a [`Settled`] future resolving when the run this call waits
    /// for completes: the newly scheduled run if the scheduler was idle, the
    /// pending run if one is scheduled but has not fired, or the trailing run
    /// if a body is currently executing. Dropping the future does not cancel
    /// the request.
    pub fn start(&self) -> Settled {
        let (tx, rx) = oneshot::channel();
        let mut st = self.inner.state();
        st.active = true;
        if !st.running {
            st.running = true;
            st.current.push(tx);
            debug!("scheduling reevaluation run");
            tokio::spawn(run_loop(Arc::clone(&self.inner)));
        } else if st.fired {
            st.trailing.push(tx);
            debug!("run in progress; joining trailing run");
        } else {
            st.current.push(tx);
            debug!("run already scheduled; joining it");
        }
        Settled { rx }
    }

    /// A weak trigger handle that fires this scheduler without keeping it
    /// alive. Handed to nodes so their stored capabilities do not leak the
    /// engine.
    pub(crate) fn trigger(&self) -> ReevalTrigger {
        ReevalTrigger {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

async fn run_loop(inner: Arc<SchedInner>) {
    loop {
        // Zero-delay hop: let the triggering burst finish before firing.
        tokio::task::yield_now().await;
        {
            let mut st = inner.state();
            st.fired = true;
            st.active = false;
        }

        (inner.run)().await;

        let mut st = inner.state();
        st.fired = false;
        for tx in st.current.drain(..) {
            let _ = tx.send(());
        }
        if st.active {
            // Requests arrived during the body; exactly one trailing run.
            st.current = std::mem::take(&mut st.trailing);
            debug!("requests arrived during run; starting trailing run");
            continue;
        }
        st.running = false;
        debug!("scheduler idle");
        return;
    }
}

/// Future returned by [`DebounceScheduler::start`]; resolves when the awaited
/// run completes. Also resolves if the scheduler is dropped mid-run.
pub struct Settled {
    rx: oneshot::Receiver<()>,
}

impl Future for Settled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<()> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|_| ())
    }
}

/// Weak handle for firing the scheduler from node-held capabilities.
///
/// If the engine (and with it the scheduler) is gone, firing is a no-op.
#[derive(Clone)]
pub struct ReevalTrigger {
    inner: Weak<SchedInner>,
}

impl ReevalTrigger {
    /// A trigger connected to nothing; firing does nothing. Placeholder for
    /// engine state constructed before its scheduler exists.
    pub(crate) fn disconnected() -> Self {
        Self { inner: Weak::new() }
    }

    /// Request a reevaluation run, fire-and-forget.
    pub fn fire(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let _ = DebounceScheduler { inner }.start();
        }
    }
}
