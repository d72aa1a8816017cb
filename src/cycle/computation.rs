//! One logical evaluation: several graphs against one market data snapshot.

use super::options::CycleOptions;
use super::result::CycleResult;
use super::state::CycleState;
use crate::compute::{CancellationToken, DependencyGraphExecutor, ExecutionFuture, SharedValues, ValueMap};
use crate::error::{EngineError, EngineResult};
use crate::graph::DependencyGraph;
use crate::market_data::{MarketDataProvider, MarketDataSnapshot};
use crate::store::ValueSpecification;
use crate::target::TargetResolver;
use crate::validation::Validator;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs the graphs of one view evaluation, in order, against a single snapshot taken
/// before the first graph starts.
///
/// `execute` blocks the calling thread; `terminate` may be called from any other thread
/// while it runs.
pub struct ComputationCycle {
    id: Uuid,
    graphs: Vec<Arc<DependencyGraph>>,
    executor: Arc<DependencyGraphExecutor>,
    provider: Arc<dyn MarketDataProvider>,
    resolver: TargetResolver,
    options: CycleOptions,
    state: Mutex<CycleState>,
    token: CancellationToken,
    /// The execution in flight, if any.
    current: Mutex<Option<ExecutionFuture>>,
}

impl ComputationCycle {
    pub fn new(
        graphs: Vec<Arc<DependencyGraph>>,
        executor: Arc<DependencyGraphExecutor>,
        provider: Arc<dyn MarketDataProvider>,
        resolver: TargetResolver,
        options: CycleOptions,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(cycle = %id, graphs = graphs.len(), "created computation cycle");
        Self {
            id,
            graphs,
            executor,
            provider,
            resolver,
            options,
            state: Mutex::new(CycleState::Created),
            token: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock()
    }

    pub fn options(&self) -> &CycleOptions {
        &self.options
    }

    fn transition(&self, next: CycleState) -> bool {
        let mut state = self.state.lock();
        if state.can_become(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Runs every graph and returns their results.
    ///
    /// Fails with `InvalidState` unless the cycle is `Created`, with `Cancelled` if it
    /// was terminated, and with the provider's error if the snapshot could not be taken.
    pub fn execute(&self) -> EngineResult<CycleResult> {
        if !self.transition(CycleState::Running) {
            return Err(EngineError::invalid_state(format!(
                "cycle {} cannot execute from state {}",
                self.id,
                self.state()
            )));
        }
        info!(cycle = %self.id, "cycle started");
        let started = Instant::now();
        let outcome = self.run(started);

        self.current.lock().take();
        debug!(cycle = %self.id, phase = "release", "released cycle resources");

        match outcome {
            Ok(result) if self.transition(CycleState::Completed) => {
                info!(cycle = %self.id, elapsed_ms = result.duration.as_millis() as u64, "cycle completed");
                Ok(result)
            }
            Ok(_) => Err(EngineError::Cancelled),
            Err(err) => {
                if self.transition(CycleState::Terminated) {
                    warn!(cycle = %self.id, error = %err, "cycle ended with an error");
                }
                Err(err)
            }
        }
    }

    fn run(&self, started: Instant) -> EngineResult<CycleResult> {
        let scope = Arc::new(self.resolver.scope(self.options.version_correction));
        let version_correction = scope.version_correction();
        let snapshot = Arc::new(self.acquire_snapshot()?);
        info!(
            cycle = %self.id,
            phase = "prepare_inputs",
            %version_correction,
            market_data = snapshot.len(),
            provider = %self.provider.name(),
            "cycle inputs prepared"
        );

        let valuation_time = self
            .options
            .valuation_time
            .or(version_correction.version_as_of)
            .unwrap_or_else(Utc::now);
        let mut shared = SharedValues::new()
            .with_snapshot(Arc::clone(&snapshot))
            .with_scope(scope)
            .with_valuation_time(valuation_time);

        let mut validation = Vec::new();
        let mut results = Vec::with_capacity(self.graphs.len());
        let mut computed = ValueMap::new();

        for graph in &self.graphs {
            let validator = Validator::new(graph, &shared).max_parent_depth(self.resolver.max_parent_depth());
            if let Err(errors) = validator.validate() {
                for error in &errors {
                    warn!(cycle = %self.id, graph = %graph.name(), %error, "graph validation failed");
                }
                validation.extend(errors);
            }

            let future = self.launch(graph, &shared)?;
            let result = future.get(None)?;
            info!(
                cycle = %self.id,
                phase = "execute",
                graph = %graph.name(),
                succeeded = result.stats().succeeded,
                failed = result.stats().failed,
                blocked = result.stats().blocked,
                "graph executed"
            );

            if self.options.share_values_between_graphs {
                computed.extend(result.values());
                shared = shared.with_values(computed.clone());
            }
            let aborted = result.is_aborted();
            results.push((graph.name().to_string(), result));
            if aborted {
                warn!(cycle = %self.id, graph = %graph.name(), "fail-fast abort; skipping remaining graphs");
                break;
            }
        }

        debug!(cycle = %self.id, phase = "populate_results", graphs = results.len(), "collected graph results");
        Ok(CycleResult {
            cycle_id: self.id,
            version_correction,
            snapshot,
            graphs: results,
            validation,
            duration: started.elapsed(),
        })
    }

    /// One snapshot covering every input no graph produces itself.
    fn acquire_snapshot(&self) -> EngineResult<MarketDataSnapshot> {
        let requirements: BTreeSet<ValueSpecification> =
            self.graphs.iter().flat_map(|g| g.terminal_inputs().iter().cloned()).collect();
        let requirements: Vec<ValueSpecification> = requirements.into_iter().collect();
        self.provider.snapshot(&requirements)
    }

    /// Starts `graph` unless the cycle has been terminated.
    fn launch(&self, graph: &Arc<DependencyGraph>, shared: &SharedValues) -> EngineResult<ExecutionFuture> {
        let parameters = self.options.node_parameters.get(graph.name()).cloned().unwrap_or_default();
        let mut current = self.current.lock();
        if self.token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let future = self.executor.prepare_with_token(
            Arc::clone(graph),
            shared.clone(),
            parameters,
            self.token.child_token(),
            self.options.fail_fast,
        );
        future.start();
        *current = Some(future.clone());
        Ok(future)
    }

    /// Stops the cycle: no further graph starts, the running execution is cancelled
    /// with interruption, and this call waits up to the configured timeout for it to
    /// unwind.
    ///
    /// The state reads `Terminated` as soon as this is called on a non-terminal cycle.
    /// Returns `Timeout` if in-flight work did not unwind in time. Terminating a
    /// completed or already terminated cycle does nothing.
    pub fn terminate(&self) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            let previous = *state;
            if previous.is_terminal() {
                debug!(cycle = %self.id, state = %previous, "terminate on finished cycle ignored");
                return Ok(());
            }
            info!(cycle = %self.id, from = %previous, "terminating cycle");
            *state = CycleState::Terminated;
        }
        self.token.cancel();

        let running = self.current.lock().clone();
        let Some(future) = running else {
            return Ok(());
        };
        future.cancel(true);
        let timeout = self.options.terminate_timeout;
        if future.wait_unwound(timeout) {
            info!(cycle = %self.id, "in-flight execution unwound");
            Ok(())
        } else {
            warn!(cycle = %self.id, ?timeout, "in-flight execution did not unwind in time");
            Err(EngineError::Timeout { operation: format!("termination of cycle {}", self.id), waited: timeout })
        }
    }
}

impl fmt::Debug for ComputationCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationCycle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("graphs", &self.graphs.iter().map(|g| g.name()).collect::<Vec<_>>())
            .field("provider", &self.provider.name())
            .finish()
    }
}
