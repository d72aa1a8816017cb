//! Concurrent, cancellable execution of a dependency graph.
//!
//! Every node carries an atomic state and a count of unfinished predecessors. A node
//! is handed to the worker pool when that count reaches zero; whichever thread moves
//! a node out of `PENDING` owns recording its outcome and settling it. When the last
//! node settles the result is published on the future.

use super::cancel::CancellationToken;
use super::future::{Completion, ExecutionFuture};
use super::ledger::{ComputationError, Ledger, NodeTiming, ValueMap};
use super::result::ExecutionResult;
use crate::analysis::telemetry::ExecutionStats;
use crate::config::ExecutorConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{CalculationContext, DependencyGraph};
use crate::market_data::MarketDataSnapshot;
use crate::store::{NodeId, Value, ValueSpecification};
use crate::target::ResolutionScope;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Opaque per-node parameters supplied with an execution request.
pub type NodeParameters = HashMap<NodeId, serde_json::Value>;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const SUCCEEDED: u8 = 2;
const FAILED: u8 = 3;
const BLOCKED: u8 = 4;
const CANCELLED: u8 = 5;

/// Read-only data visible to every node of an execution: values computed elsewhere
/// (earlier graphs of the same cycle), the cycle's market data snapshot and its
/// resolution scope.
#[derive(Clone, Default)]
pub struct SharedValues {
    values: Arc<ValueMap>,
    snapshot: Option<Arc<MarketDataSnapshot>>,
    scope: Option<Arc<ResolutionScope>>,
    valuation_time: Option<DateTime<Utc>>,
}

impl SharedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(mut self, values: ValueMap) -> Self {
        self.values = Arc::new(values);
        self
    }

    pub fn with_snapshot(mut self, snapshot: Arc<MarketDataSnapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_scope(mut self, scope: Arc<ResolutionScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_valuation_time(mut self, valuation_time: DateTime<Utc>) -> Self {
        self.valuation_time = Some(valuation_time);
        self
    }

    /// Explicit values shadow the snapshot.
    pub fn get(&self, spec: &ValueSpecification) -> Option<Value> {
        self.values
            .get(spec)
            .cloned()
            .or_else(|| self.snapshot.as_ref().and_then(|s| s.get(spec).cloned()))
    }

    pub fn contains(&self, spec: &ValueSpecification) -> bool {
        self.values.contains_key(spec) || self.snapshot.as_ref().is_some_and(|s| s.contains(spec))
    }

    pub fn snapshot(&self) -> Option<&Arc<MarketDataSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn valuation_time(&self) -> Option<DateTime<Utc>> {
        self.valuation_time
    }
}

impl fmt::Debug for SharedValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedValues")
            .field("values", &self.values.len())
            .field("snapshot", &self.snapshot.as_ref().map(|s| s.len()))
            .field("scope", &self.scope)
            .field("valuation_time", &self.valuation_time)
            .finish()
    }
}

/// Runs dependency graphs on a fixed-size worker pool.
///
/// The pool is sized by configuration, independently of graph size. One executor may
/// run many executions at once; per-execution state is never shared between them.
pub struct DependencyGraphExecutor {
    pool: Arc<ThreadPool>,
    fail_fast: bool,
}

impl DependencyGraphExecutor {
    pub fn new(config: &ExecutorConfig) -> EngineResult<Self> {
        if config.worker_threads == 0 {
            return Err(EngineError::invalid_argument("worker_threads must be at least 1"));
        }
        let prefix = config.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| EngineError::invalid_state(format!("cannot start worker pool: {e}")))?;
        info!(workers = config.worker_threads, fail_fast = config.fail_fast, "started graph executor");
        Ok(Self { pool: Arc::new(pool), fail_fast: config.fail_fast })
    }

    pub fn with_threads(worker_threads: usize) -> EngineResult<Self> {
        Self::new(&ExecutorConfig { worker_threads, ..ExecutorConfig::default() })
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Builds a future without scheduling anything; call [`ExecutionFuture::start`].
    pub fn prepare(
        &self,
        graph: Arc<DependencyGraph>,
        shared: SharedValues,
        parameters: NodeParameters,
    ) -> ExecutionFuture {
        self.prepare_with_token(graph, shared, parameters, CancellationToken::new(), self.fail_fast)
    }

    pub(crate) fn prepare_with_token(
        &self,
        graph: Arc<DependencyGraph>,
        shared: SharedValues,
        parameters: NodeParameters,
        token: CancellationToken,
        fail_fast: bool,
    ) -> ExecutionFuture {
        let run = ExecutionRun::new(graph, shared, parameters, Arc::clone(&self.pool), token, fail_fast);
        ExecutionFuture::new(Arc::new(run))
    }

    pub fn execute(&self, graph: Arc<DependencyGraph>, shared: SharedValues, parameters: NodeParameters) -> ExecutionFuture {
        let future = self.prepare(graph, shared, parameters);
        future.start();
        future
    }
}

impl fmt::Debug for DependencyGraphExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraphExecutor")
            .field("workers", &self.pool.current_num_threads())
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}

/// Mutable state of one execution, owned by its future and the tasks it spawns.
pub(crate) struct ExecutionRun {
    graph: Arc<DependencyGraph>,
    shared: SharedValues,
    parameters: NodeParameters,
    pool: Arc<ThreadPool>,
    token: CancellationToken,
    fail_fast: bool,

    states: Vec<AtomicU8>,
    remaining: Vec<AtomicUsize>,
    outstanding: AtomicUsize,
    stopped: AtomicBool,
    swept: AtomicBool,
    aborted: AtomicBool,
    finished: AtomicBool,

    running: AtomicUsize,
    peak: AtomicUsize,
    sequence: AtomicU64,
    started_at: Mutex<Option<Instant>>,

    ledger: Mutex<Ledger>,
    completion: Completion,
}

impl ExecutionRun {
    fn new(
        graph: Arc<DependencyGraph>,
        shared: SharedValues,
        parameters: NodeParameters,
        pool: Arc<ThreadPool>,
        token: CancellationToken,
        fail_fast: bool,
    ) -> Self {
        let count = graph.len();
        let remaining = (0..count).map(|i| AtomicUsize::new(graph.parents(NodeId::new(i)).len())).collect();
        Self {
            shared,
            parameters,
            pool,
            token,
            fail_fast,
            states: (0..count).map(|_| AtomicU8::new(PENDING)).collect(),
            remaining,
            outstanding: AtomicUsize::new(count),
            stopped: AtomicBool::new(false),
            swept: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            started_at: Mutex::new(None),
            ledger: Mutex::new(Ledger::with_capacity(count)),
            completion: Completion::new(),
            graph,
        }
    }

    pub(crate) fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }

    pub(crate) fn launch(self: &Arc<Self>) {
        *self.started_at.lock() = Some(Instant::now());
        info!(graph = %self.graph.name(), nodes = self.graph.len(), "starting execution");
        if self.graph.is_empty() {
            self.finish();
            return;
        }
        for root in self.graph.roots() {
            self.schedule(root);
        }
    }

    /// Stops scheduling; every node still pending is recorded as cancelled.
    pub(crate) fn stop(self: &Arc<Self>, interrupt_running: bool) {
        self.stopped.store(true, Ordering::SeqCst);
        if interrupt_running {
            self.token.cancel();
        }
        self.sweep_pending();
    }

    /// Publishes the result of an execution that was never launched.
    pub(crate) fn abandon(self: &Arc<Self>) {
        if self.outstanding.load(Ordering::SeqCst) == 0 {
            self.finish();
        }
    }

    fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.token.is_cancelled()
    }

    fn schedule(self: &Arc<Self>, node: NodeId) {
        let run = Arc::clone(self);
        self.pool.spawn(move || run.run_node(node));
    }

    fn transition(&self, node: NodeId, from: u8, to: u8) -> bool {
        self.states[node.index()].compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    fn node_name(&self, node: NodeId) -> &str {
        self.graph.nodes()[node.index()].name.as_str()
    }

    fn run_node(self: &Arc<Self>, node: NodeId) {
        if self.should_stop() {
            self.sweep_pending();
            return;
        }
        if !self.transition(node, PENDING, RUNNING) {
            return;
        }
        if self.should_stop() {
            self.states[node.index()].store(CANCELLED, Ordering::SeqCst);
            self.ledger.lock().insert(node, Err(ComputationError::Cancelled { node: self.node_name(node).to_string() }));
            self.settle();
            self.sweep_pending();
            return;
        }

        let concurrent = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(concurrent, Ordering::SeqCst);
        let started = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!(graph = %self.graph.name(), node = %self.node_name(node), "node started");

        let outcome = self.calculate(node);

        self.running.fetch_sub(1, Ordering::SeqCst);
        let finished = self.sequence.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(values) => {
                {
                    let mut ledger = self.ledger.lock();
                    ledger.insert(node, Ok(Arc::new(values)));
                    ledger.record_timing(node, NodeTiming { started, finished });
                }
                self.states[node.index()].store(SUCCEEDED, Ordering::SeqCst);
                debug!(graph = %self.graph.name(), node = %self.node_name(node), "node succeeded");
                for child in self.graph.children(node) {
                    if self.remaining[child.index()].fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.schedule(child);
                    }
                }
                self.settle();
            }
            Err(err) => {
                let cancelled = err.is_cancelled();
                {
                    let mut ledger = self.ledger.lock();
                    ledger.insert(node, Err(err.clone()));
                    ledger.record_timing(node, NodeTiming { started, finished });
                }
                self.states[node.index()].store(if cancelled { CANCELLED } else { FAILED }, Ordering::SeqCst);
                if cancelled {
                    debug!(graph = %self.graph.name(), node = %self.node_name(node), "node interrupted");
                    self.sweep_pending();
                } else {
                    warn!(graph = %self.graph.name(), node = %self.node_name(node), error = %err, "node failed");
                    if self.fail_fast {
                        self.aborted.store(true, Ordering::SeqCst);
                        self.stopped.store(true, Ordering::SeqCst);
                        self.sweep_pending();
                    } else {
                        self.block_dependents(node);
                    }
                }
                self.settle();
            }
        }
    }

    fn calculate(&self, node: NodeId) -> Result<ValueMap, ComputationError> {
        let cnode = &self.graph.nodes()[node.index()];
        let name = cnode.name.as_str();

        let mut inputs = ValueMap::with_capacity(cnode.inputs.len());
        {
            let ledger = self.ledger.lock();
            for spec in &cnode.inputs {
                let value = match self.graph.producer_of(spec) {
                    Some(producer) => match ledger.get(producer) {
                        Some(Ok(values)) => values.get(spec).cloned(),
                        _ => None,
                    },
                    None => self.shared.get(spec),
                };
                match value {
                    Some(value) => {
                        inputs.insert(spec.clone(), value);
                    }
                    None => {
                        return Err(ComputationError::MissingInput { node: name.to_string(), input: spec.to_string() });
                    }
                }
            }
        }

        let context = CalculationContext {
            node,
            node_name: name,
            target: &cnode.target,
            inputs: &inputs,
            parameters: self.parameters.get(&node),
            cancellation: &self.token,
            valuation_time: self.shared.valuation_time,
            scope: self.shared.scope.as_deref(),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| cnode.function.execute(&context))) {
            Err(payload) => Err(ComputationError::Panicked { node: name.to_string(), message: panic_message(payload) }),
            Ok(Err(_)) if self.token.is_cancelled() => Err(ComputationError::Cancelled { node: name.to_string() }),
            Ok(Err(message)) => Err(ComputationError::CalculationFailure { node: name.to_string(), message }),
            Ok(Ok(mut values)) => {
                if let Some(missing) = cnode.outputs.iter().find(|o| !values.contains_key(*o)) {
                    return Err(ComputationError::MissingOutput { node: name.to_string(), output: missing.to_string() });
                }
                values.retain(|spec, _| cnode.produces(spec));
                Ok(values)
            }
        }
    }

    /// Marks every pending transitive dependent of `failed` as blocked.
    fn block_dependents(&self, failed: NodeId) {
        let mut stack = vec![failed];
        while let Some(upstream) = stack.pop() {
            for child in self.graph.children(upstream) {
                if self.transition(child, PENDING, BLOCKED) {
                    self.ledger.lock().insert(
                        child,
                        Err(ComputationError::UpstreamFailure {
                            node: self.node_name(child).to_string(),
                            upstream: self.node_name(upstream).to_string(),
                        }),
                    );
                    stack.push(child);
                    self.settle();
                }
            }
        }
    }

    fn sweep_pending(&self) {
        if self.swept.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut swept = 0usize;
        for i in 0..self.graph.len() {
            let node = NodeId::new(i);
            if self.transition(node, PENDING, CANCELLED) {
                self.ledger.lock().insert(node, Err(ComputationError::Cancelled { node: self.node_name(node).to_string() }));
                swept += 1;
                self.settle();
            }
        }
        if swept > 0 {
            debug!(graph = %self.graph.name(), nodes = swept, "cancelled pending nodes");
        }
    }

    fn settle(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let duration = self.started_at.lock().map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
        let ledger = std::mem::take(&mut *self.ledger.lock());
        let stats = ExecutionStats::analyze(&ledger, self.graph.len(), duration, self.peak.load(Ordering::SeqCst));
        let aborted = self.aborted.load(Ordering::SeqCst);
        info!(
            graph = %self.graph.name(),
            succeeded = stats.succeeded,
            failed = stats.failed,
            blocked = stats.blocked,
            cancelled = stats.cancelled,
            aborted,
            elapsed_ms = duration.as_millis() as u64,
            "execution finished"
        );
        let result = Arc::new(ExecutionResult::new(Arc::clone(&self.graph), ledger, stats, aborted));
        self.completion.complete(result, self.token.is_cancelled());
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::future::FutureState;
    use crate::compute::result::ValueOutcome;
    use crate::graph::{CalculationFunction, FnCalculation};
    use crate::target::TargetSpecification;
    use rstest::rstest;
    use std::thread;

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(name, TargetSpecification::primitive("T", "1"))
    }

    /// Sums its scalar inputs plus one.
    fn sum_plus_one(output: &str) -> Arc<dyn CalculationFunction> {
        let out = spec(output);
        Arc::new(FnCalculation::new("sum", move |ctx| {
            let total: f64 = ctx.inputs().values().filter_map(Value::as_scalar).sum();
            Ok(ValueMap::from([(out.clone(), Value::Scalar(total + 1.0))]))
        }))
    }

    fn failing() -> Arc<dyn CalculationFunction> {
        Arc::new(FnCalculation::new("fail", |_| Err("boom".to_string())))
    }

    /// Blocks until interrupted; counts how many times it started.
    fn blocking(output: &str, started: Arc<AtomicUsize>) -> Arc<dyn CalculationFunction> {
        let out = spec(output);
        Arc::new(FnCalculation::new("block", move |ctx| {
            started.fetch_add(1, Ordering::SeqCst);
            if ctx.cancellation().wait_timeout(Duration::from_secs(10)) {
                Err("interrupted".to_string())
            } else {
                Ok(ValueMap::from([(out.clone(), Value::Scalar(0.0))]))
            }
        }))
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// A -> B -> C, plus an independent D. B uses `b` as its function.
    fn chain(b: Arc<dyn CalculationFunction>) -> Arc<DependencyGraph> {
        let t = TargetSpecification::primitive("T", "1");
        let mut builder = DependencyGraph::builder("chain");
        builder.add_node("A", t.clone(), [], [spec("A")], sum_plus_one("A"));
        builder.add_node("B", t.clone(), [spec("A")], [spec("B")], b);
        builder.add_node("C", t.clone(), [spec("B")], [spec("C")], sum_plus_one("C"));
        builder.add_node("D", t, [], [spec("D")], sum_plus_one("D"));
        Arc::new(builder.build().unwrap())
    }

    fn executor() -> DependencyGraphExecutor {
        DependencyGraphExecutor::with_threads(4).unwrap()
    }

    #[test]
    fn test_predecessors_finish_before_successors_start() {
        let graph = chain(sum_plus_one("B"));
        let result = executor().execute(graph.clone(), SharedValues::new(), NodeParameters::new()).get(None).unwrap();

        assert!(result.is_success());
        for node in graph.nodes() {
            let timing = result.timing(node.id).unwrap();
            for &parent in graph.parents(node.id) {
                assert!(result.timing(parent).unwrap().finished < timing.started);
            }
        }
        assert_eq!(result.value(&spec("C")), ValueOutcome::Computed(Value::Scalar(3.0)));
        assert_eq!(result.value(&spec("D")), ValueOutcome::Computed(Value::Scalar(1.0)));
        assert_eq!(result.stats().succeeded, 4);
    }

    #[test]
    fn test_failure_blocks_dependents_only() {
        let graph = chain(failing());
        let future = executor().execute(graph, SharedValues::new(), NodeParameters::new());
        let result = future.get(None).unwrap();

        assert_eq!(future.state(), FutureState::Done);
        assert_eq!(result.value(&spec("A")), ValueOutcome::Computed(Value::Scalar(1.0)));
        assert_eq!(result.value(&spec("D")), ValueOutcome::Computed(Value::Scalar(1.0)));
        assert!(matches!(
            result.value(&spec("B")),
            ValueOutcome::Failed(ComputationError::CalculationFailure { .. })
        ));
        assert_eq!(result.value(&spec("C")), ValueOutcome::Blocked { upstream: "B".into() });
        // C never ran.
        assert!(result.timing(NodeId(2)).is_none());
        assert!(!result.is_aborted());
        assert_eq!((result.stats().failed, result.stats().blocked), (1, 1));
    }

    #[test]
    fn test_fail_fast_cancels_pending_nodes() {
        let t = TargetSpecification::primitive("T", "1");
        let started = Arc::new(AtomicUsize::new(0));
        let mut builder = DependencyGraph::builder("fail-fast");
        builder.add_node("gate", t.clone(), [], [spec("G")], sum_plus_one("G"));
        builder.add_node("bad", t.clone(), [spec("G")], [spec("X")], failing());
        builder.add_node("late", t.clone(), [spec("X")], [spec("Y")], blocking("Y", started.clone()));
        let graph = Arc::new(builder.build().unwrap());

        let executor = DependencyGraphExecutor::with_threads(1).unwrap().fail_fast(true);
        let future = executor.execute(graph, SharedValues::new(), NodeParameters::new());
        let result = future.get(Some(Duration::from_secs(5))).unwrap();

        assert!(result.is_aborted());
        assert_eq!(future.state(), FutureState::Done);
        assert_eq!(result.value(&spec("Y")), ValueOutcome::Cancelled);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case::missing_input(Arc::new(FnCalculation::new("noop", |_| Ok(ValueMap::new()))) as Arc<dyn CalculationFunction>, true)]
    #[case::missing_output(Arc::new(FnCalculation::new("noop", |_| Ok(ValueMap::new()))) as Arc<dyn CalculationFunction>, false)]
    #[case::panic(Arc::new(FnCalculation::new("panics", |_| panic!("bad curve"))) as Arc<dyn CalculationFunction>, false)]
    fn test_node_failures_are_recorded_not_raised(#[case] function: Arc<dyn CalculationFunction>, #[case] needs_market_data: bool) {
        let t = TargetSpecification::primitive("T", "1");
        let inputs = if needs_market_data { vec![spec("Quote")] } else { vec![] };
        let mut builder = DependencyGraph::builder("single");
        builder.add_node("n", t, inputs, [spec("PV")], function);
        let graph = Arc::new(builder.build().unwrap());

        let result = executor().execute(graph, SharedValues::new(), NodeParameters::new()).get(None).unwrap();
        let ValueOutcome::Failed(err) = result.value(&spec("PV")) else {
            panic!("expected a failure record");
        };
        match err {
            ComputationError::MissingInput { input, .. } => assert!(needs_market_data && input.starts_with("Quote")),
            ComputationError::MissingOutput { output, .. } => assert!(output.starts_with("PV")),
            ComputationError::Panicked { message, .. } => assert_eq!(message, "bad curve"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shared_values_and_parameters_reach_calculations() {
        let t = TargetSpecification::primitive("T", "1");
        let out = spec("Scaled");
        let mut builder = DependencyGraph::builder("params");
        let node = builder.add_node(
            "scale",
            t,
            [spec("Quote")],
            [out.clone()],
            Arc::new(FnCalculation::new("scale", move |ctx| {
                let quote = ctx.input_named("Quote").and_then(Value::as_scalar).ok_or("no quote")?;
                let factor = ctx.parameters().and_then(|p| p["factor"].as_f64()).unwrap_or(1.0);
                Ok(ValueMap::from([(out.clone(), Value::Scalar(quote * factor))]))
            })),
        );
        let graph = Arc::new(builder.build().unwrap());

        let shared = SharedValues::new().with_values(ValueMap::from([(spec("Quote"), Value::Scalar(50.0))]));
        let params = NodeParameters::from([(node, serde_json::json!({ "factor": 2.0 }))]);
        let result = executor().execute(graph, shared, params).get(None).unwrap();
        assert_eq!(result.value(&spec("Scaled")), ValueOutcome::Computed(Value::Scalar(100.0)));
    }

    #[test]
    fn test_cancel_before_start_runs_nothing() {
        let started = Arc::new(AtomicUsize::new(0));
        let graph = chain(blocking("B", started.clone()));
        let future = executor().prepare(graph, SharedValues::new(), NodeParameters::new());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        future.set_listener(move |state, _| {
            assert_eq!(state, FutureState::Cancelled);
            counter.fetch_add(1, Ordering::SeqCst);
        }).unwrap();

        assert!(future.cancel(false));
        future.start();

        assert_eq!(future.state(), FutureState::Cancelled);
        assert!(matches!(future.get(None), Err(EngineError::Cancelled)));
        let result = future.result().unwrap();
        assert_eq!(result.stats().cancelled, 4);
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!future.cancel(true));
    }

    #[test]
    fn test_cancel_interrupts_running_node() {
        let started = Arc::new(AtomicUsize::new(0));
        let graph = chain(blocking("B", started.clone()));
        let future = executor().execute(graph, SharedValues::new(), NodeParameters::new());

        wait_for(|| started.load(Ordering::SeqCst) == 1);
        assert_eq!(future.state(), FutureState::Running);
        assert!(future.cancel(true));
        assert!(future.wait_unwound(Duration::from_secs(5)));

        let result = future.result().unwrap();
        assert_eq!(result.value(&spec("B")), ValueOutcome::Cancelled);
        assert_eq!(result.value(&spec("C")), ValueOutcome::Cancelled);
        assert_eq!(result.value(&spec("A")), ValueOutcome::Computed(Value::Scalar(1.0)));
        assert!(future.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_blocked_node_does_not_hold_back_independent_nodes() {
        let started = Arc::new(AtomicUsize::new(0));
        let d_done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let t = TargetSpecification::primitive("T", "1");
        let mut builder = DependencyGraph::builder("independent");
        builder.add_node("A", t.clone(), [], [spec("A")], sum_plus_one("A"));
        builder.add_node("B", t.clone(), [spec("A")], [spec("B")], blocking("B", started.clone()));
        builder.add_node("C", t.clone(), [spec("B")], [spec("C")], sum_plus_one("C"));
        // D only finishes once B is blocked, so both are in flight together.
        let (b_started, done, out) = (started.clone(), d_done.clone(), spec("D"));
        builder.add_node("D", t, [], [spec("D")], Arc::new(FnCalculation::new("after_b", move |_| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while b_started.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            done.store(true, Ordering::SeqCst);
            Ok(ValueMap::from([(out.clone(), Value::Scalar(1.0))]))
        })));
        let graph = Arc::new(builder.build().unwrap());

        let executor = DependencyGraphExecutor::with_threads(2).unwrap();
        let future = executor.execute(graph, SharedValues::new(), NodeParameters::new());
        wait_for(|| started.load(Ordering::SeqCst) == 1 && d_done.load(Ordering::SeqCst));
        assert_eq!(future.state(), FutureState::Running);

        assert!(future.cancel(true));
        assert!(future.wait_unwound(Duration::from_secs(5)));
        let result = future.result().unwrap();
        assert_eq!(result.value(&spec("D")), ValueOutcome::Computed(Value::Scalar(1.0)));
        assert_eq!(result.value(&spec("B")), ValueOutcome::Cancelled);
        assert_eq!(result.value(&spec("C")), ValueOutcome::Cancelled);
    }

    #[test]
    fn test_cancel_without_interrupt_lets_running_node_finish() {
        let started = Arc::new(AtomicUsize::new(0));
        let graph = chain(blocking("B", started.clone()));
        let future = executor().execute(graph, SharedValues::new(), NodeParameters::new());

        wait_for(|| started.load(Ordering::SeqCst) == 1);
        assert!(future.cancel(false));
        assert!(!future.cancellation_token().is_cancelled());
        // B is still blocked; nothing has been published yet.
        assert!(!future.wait_unwound(Duration::from_millis(50)));

        // Release B through its token; C must not be scheduled after the cancel.
        future.cancellation_token().cancel();
        assert!(future.wait_unwound(Duration::from_secs(5)));
        assert_eq!(future.result().unwrap().value(&spec("C")), ValueOutcome::Cancelled);
    }

    #[rstest]
    #[case::success(sum_plus_one("B"), FutureState::Done)]
    #[case::failure(failing(), FutureState::Done)]
    fn test_listener_fires_exactly_once(#[case] b: Arc<dyn CalculationFunction>, #[case] expected: FutureState) {
        let future = executor().prepare(chain(b), SharedValues::new(), NodeParameters::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        future.set_listener(move |state, _| {
            assert_eq!(state, expected);
            counter.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
        assert!(matches!(future.set_listener(|_, _| {}), Err(EngineError::InvalidState(_))));

        future.start();
        assert!(future.wait_unwound(Duration::from_secs(5)));
        wait_for(|| fired.load(Ordering::SeqCst) == 1);
        assert!(!future.cancel(true));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_registered_after_completion_fires_immediately() {
        let future = executor().execute(chain(sum_plus_one("B")), SharedValues::new(), NodeParameters::new());
        future.get(None).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        future.set_listener(move |_, result| {
            assert!(result.is_success());
            counter.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_graph_completes() {
        let graph = Arc::new(DependencyGraph::builder("empty").build().unwrap());
        let result = executor().execute(graph, SharedValues::new(), NodeParameters::new()).get(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(result.stats().total_nodes, 0);
    }

    #[test]
    fn test_get_times_out_while_node_blocks() {
        let started = Arc::new(AtomicUsize::new(0));
        let future = executor().execute(chain(blocking("B", started.clone())), SharedValues::new(), NodeParameters::new());
        assert!(matches!(future.get(Some(Duration::from_millis(20))), Err(EngineError::Timeout { .. })));
        future.cancel(true);
        assert!(future.wait_unwound(Duration::from_secs(5)));
    }
}
