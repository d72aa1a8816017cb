//! Handle on one graph execution.

use super::cancel::CancellationToken;
use super::engine::ExecutionRun;
use super::result::ExecutionResult;
use crate::error::{EngineError, EngineResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Running,
    Done,
    Cancelled,
}

impl FutureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

type Listener = Box<dyn FnOnce(FutureState, Arc<ExecutionResult>) + Send>;

enum ListenerSlot {
    Empty,
    Registered(Listener),
    Fired,
}

struct CompletionState {
    phase: FutureState,
    result: Option<Arc<ExecutionResult>>,
    listener: ListenerSlot,
}

/// Completion bookkeeping shared by the future and the workers.
pub(crate) struct Completion {
    state: Mutex<CompletionState>,
    cond: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CompletionState {
                phase: FutureState::Pending,
                result: None,
                listener: ListenerSlot::Empty,
            }),
            cond: Condvar::new(),
        }
    }

    fn phase(&self) -> FutureState {
        self.state.lock().phase
    }

    fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != FutureState::Pending {
            return false;
        }
        state.phase = FutureState::Running;
        true
    }

    /// Moves to `Cancelled` unless already terminal; returns the phase it left.
    fn try_cancel(&self) -> Option<FutureState> {
        let mut state = self.state.lock();
        if state.phase.is_terminal() {
            return None;
        }
        let previous = state.phase;
        state.phase = FutureState::Cancelled;
        Some(previous)
    }

    /// Publishes the final result. Called once, after every node has settled.
    pub(crate) fn complete(&self, result: Arc<ExecutionResult>, interrupted: bool) {
        let (listener, phase) = {
            let mut state = self.state.lock();
            if !state.phase.is_terminal() {
                state.phase = if interrupted { FutureState::Cancelled } else { FutureState::Done };
            }
            state.result = Some(Arc::clone(&result));
            let listener = match std::mem::replace(&mut state.listener, ListenerSlot::Empty) {
                ListenerSlot::Registered(listener) => {
                    state.listener = ListenerSlot::Fired;
                    Some(listener)
                }
                other => {
                    state.listener = other;
                    None
                }
            };
            self.cond.notify_all();
            (listener, state.phase)
        };
        if let Some(listener) = listener {
            listener(phase, result);
        }
    }

    /// Waits for the result; `None` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> Option<(FutureState, Arc<ExecutionResult>)> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(result) = &state.result {
                return Some((state.phase, Arc::clone(result)));
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() && state.result.is_none() {
                        return None;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}

/// Completion handle returned by
/// [`DependencyGraphExecutor::execute`](super::DependencyGraphExecutor::execute).
///
/// Clones refer to the same execution. A result is published only once every node has
/// settled, so waiting on the future also waits for in-flight work to unwind.
#[derive(Clone)]
pub struct ExecutionFuture {
    run: Arc<ExecutionRun>,
}

impl ExecutionFuture {
    pub(crate) fn new(run: Arc<ExecutionRun>) -> Self {
        Self { run }
    }

    pub fn state(&self) -> FutureState {
        self.run.completion().phase()
    }

    /// Schedules the graph's root nodes. Does nothing unless the future is pending.
    pub fn start(&self) {
        if self.run.completion().try_start() {
            self.run.launch();
        }
    }

    /// Stops scheduling nodes. With `may_interrupt_running`, calculations already
    /// running also see their cancellation token tripped.
    ///
    /// Returns false if the execution had already completed or been cancelled.
    pub fn cancel(&self, may_interrupt_running: bool) -> bool {
        let Some(previous) = self.run.completion().try_cancel() else {
            return false;
        };
        info!(graph = %self.run.graph().name(), from = ?previous, may_interrupt_running, "cancelling execution");
        self.run.stop(may_interrupt_running);
        if previous == FutureState::Pending {
            // Nothing was ever scheduled; settle here since no worker will.
            self.run.abandon();
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// Blocks until the execution has unwound, or `timeout` elapses.
    pub fn get(&self, timeout: Option<Duration>) -> EngineResult<Arc<ExecutionResult>> {
        match self.run.completion().wait(timeout) {
            None => Err(EngineError::Timeout {
                operation: format!("execution of graph '{}'", self.run.graph().name()),
                waited: timeout.unwrap_or_default(),
            }),
            Some((FutureState::Cancelled, _)) => Err(EngineError::Cancelled),
            Some((_, result)) => Ok(result),
        }
    }

    /// Waits for in-flight work to unwind; true if it did within `timeout`.
    pub fn wait_unwound(&self, timeout: Duration) -> bool {
        self.run.completion().wait(Some(timeout)).is_some()
    }

    /// The published result, including partial results of a cancelled execution.
    pub fn result(&self) -> Option<Arc<ExecutionResult>> {
        self.run.completion().state.lock().result.clone()
    }

    /// Registers the single completion listener. It fires exactly once, on whichever
    /// thread publishes the result, or immediately if that already happened.
    pub fn set_listener<F>(&self, listener: F) -> EngineResult<()>
    where
        F: FnOnce(FutureState, Arc<ExecutionResult>) + Send + 'static,
    {
        let completion = self.run.completion();
        let ready = {
            let mut state = completion.state.lock();
            if !matches!(state.listener, ListenerSlot::Empty) {
                return Err(EngineError::invalid_state("a listener is already registered on this future"));
            }
            match &state.result {
                Some(result) => {
                    let ready = (state.phase, Arc::clone(result));
                    state.listener = ListenerSlot::Fired;
                    Some(ready)
                }
                None => {
                    state.listener = ListenerSlot::Registered(Box::new(listener));
                    return Ok(());
                }
            }
        };
        if let Some((phase, result)) = ready {
            listener(phase, result);
        }
        Ok(())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.run.token()
    }
}

impl fmt::Debug for ExecutionFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFuture")
            .field("graph", &self.run.graph().name())
            .field("state", &self.state())
            .finish()
    }
}
