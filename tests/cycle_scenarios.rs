//! End-to-end behaviour of cycles, executors, resolution and provider composition.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use vantage_core::compute::{NodeParameters, ValueMap};
use vantage_core::market_data::InMemoryMarketDataProvider;
use vantage_core::target::{ComputationTarget, Entity, InMemoryEntitySource, ObjectId, TargetType};
use vantage_core::{
    CalculationContext, Clock, ComputationCycle, CompositeProvider, CycleOptions, CycleState, DependencyGraph,
    DependencyGraphExecutor, EngineError, FnCalculation, FutureState, ManualClock, MarketDataProvider, SharedValues,
    TargetResolver, TargetSpecification, Value, ValueOutcome, ValueSpecification, VersionCorrection,
};

fn spec(name: &str) -> ValueSpecification {
    ValueSpecification::new(name, TargetSpecification::primitive("Trade", "T1"))
}

fn quote(ticker: &str) -> ValueSpecification {
    ValueSpecification::new("MarketValue", TargetSpecification::primitive("Ticker", ticker))
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
}

fn executor(threads: usize) -> Arc<DependencyGraphExecutor> {
    Arc::new(DependencyGraphExecutor::with_threads(threads).unwrap())
}

fn empty_resolver() -> TargetResolver {
    TargetResolver::builder(Arc::new(InMemoryEntitySource::new())).build()
}

/// Sums its inputs into a single output.
fn summing(output: ValueSpecification) -> Arc<FnCalculation> {
    Arc::new(FnCalculation::new("sum", move |ctx: &CalculationContext<'_>| {
        let total: f64 = ctx.inputs().values().filter_map(Value::as_scalar).sum();
        Ok([(output.clone(), Value::Scalar(total + 1.0))].into_iter().collect())
    }))
}

/// A -> B -> C, D independent.
fn chain(b_fails: bool) -> Arc<DependencyGraph> {
    let mut builder = DependencyGraph::builder("chain");
    let target = TargetSpecification::primitive("Trade", "T1");
    builder.add_node("A", target.clone(), [], [spec("A")], summing(spec("A")));
    if b_fails {
        let broken = FnCalculation::new("broken", |_: &CalculationContext<'_>| Err("no curve".to_string()));
        builder.add_node("B", target.clone(), [spec("A")], [spec("B")], Arc::new(broken));
    } else {
        builder.add_node("B", target.clone(), [spec("A")], [spec("B")], summing(spec("B")));
    }
    builder.add_node("C", target.clone(), [spec("B")], [spec("C")], summing(spec("C")));
    builder.add_node("D", target, [], [spec("D")], summing(spec("D")));
    Arc::new(builder.build().unwrap())
}

#[test]
fn test_chain_runs_in_dependency_order() {
    let graph = chain(false);
    let result = executor(4).execute(graph.clone(), SharedValues::new(), NodeParameters::new()).get(None).unwrap();

    let timing = |name: &str| result.timing(graph.node_by_name(name).unwrap().id).unwrap();
    assert!(timing("B").started > timing("A").finished);
    assert!(timing("C").started > timing("B").finished);

    assert!(result.is_success());
    assert_eq!(result.value(&spec("A")), ValueOutcome::Computed(Value::Scalar(1.0)));
    assert_eq!(result.value(&spec("B")), ValueOutcome::Computed(Value::Scalar(2.0)));
    assert_eq!(result.value(&spec("C")), ValueOutcome::Computed(Value::Scalar(3.0)));
    assert_eq!(result.value(&spec("D")), ValueOutcome::Computed(Value::Scalar(1.0)));
    assert!(result.failures().is_empty());
}

#[test]
fn test_failure_blocks_only_dependents() {
    let graph = chain(true);
    let result = executor(4).execute(graph.clone(), SharedValues::new(), NodeParameters::new()).get(None).unwrap();

    assert!(matches!(result.value(&spec("B")), ValueOutcome::Failed(_)));
    assert_eq!(result.value(&spec("C")), ValueOutcome::Blocked { upstream: "B".to_string() });
    assert!(result.timing(graph.node_by_name("C").unwrap().id).is_none());
    assert_eq!(result.value(&spec("A")), ValueOutcome::Computed(Value::Scalar(1.0)));
    assert_eq!(result.value(&spec("D")), ValueOutcome::Computed(Value::Scalar(1.0)));
    assert_eq!(result.stats().failed, 1);
    assert_eq!(result.stats().blocked, 1);
    assert!(!result.is_aborted());
}

#[test]
fn test_cancelled_before_start_never_runs_nodes() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let mut builder = DependencyGraph::builder("never");
    let f = FnCalculation::new("count", move |_: &CalculationContext<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ValueMap::new())
    });
    builder.add_node("N", TargetSpecification::primitive("Trade", "T1"), [], [spec("N")], Arc::new(f));
    let future = executor(2).prepare(Arc::new(builder.build().unwrap()), SharedValues::new(), NodeParameters::new());

    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    future.set_listener(move |state, _| sink.lock().push(state)).unwrap();

    assert!(future.cancel(false));
    future.start();
    assert!(matches!(future.get(Some(Duration::from_secs(5))), Err(EngineError::Cancelled)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(*fired.lock(), vec![FutureState::Cancelled]);
}

/// A graph whose single node blocks until its cancellation token trips.
fn blocking_graph(started: mpsc::Sender<()>, observed_interrupt: Arc<AtomicBool>) -> Arc<DependencyGraph> {
    let started = Mutex::new(started);
    let f = FnCalculation::new("wait_for_interrupt", move |ctx: &CalculationContext<'_>| {
        let _ = started.lock().send(());
        if ctx.cancellation().wait_timeout(Duration::from_secs(30)) {
            observed_interrupt.store(true, Ordering::SeqCst);
            return Err("interrupted".to_string());
        }
        Ok(ValueMap::new())
    });
    let mut builder = DependencyGraph::builder("blocking");
    builder.add_node("block", TargetSpecification::primitive("Trade", "T1"), [], [spec("Blocked")], Arc::new(f));
    Arc::new(builder.build().unwrap())
}

#[test]
fn test_cancel_interrupts_running_node() {
    let (tx, rx) = mpsc::channel();
    let interrupted = Arc::new(AtomicBool::new(false));
    let future = executor(2).execute(blocking_graph(tx, interrupted.clone()), SharedValues::new(), NodeParameters::new());

    let fired = Arc::new(AtomicUsize::new(0));
    let count = fired.clone();
    future.set_listener(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(future.cancel(true));
    assert!(future.wait_unwound(Duration::from_secs(5)));
    assert!(interrupted.load(Ordering::SeqCst));
    assert!(future.is_cancelled());
    assert!(!future.cancel(true));

    // The listener runs just after the result is published.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while fired.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_terminate_reaches_in_flight_work() {
    let (tx, rx) = mpsc::channel();
    let interrupted = Arc::new(AtomicBool::new(false));
    let feed = Arc::new(InMemoryMarketDataProvider::new("base"));
    let cycle = Arc::new(ComputationCycle::new(
        vec![blocking_graph(tx, interrupted.clone()), chain(false)],
        executor(2),
        feed,
        empty_resolver(),
        CycleOptions::default().terminate_timeout(Duration::from_secs(5)),
    ));

    let running = cycle.clone();
    let handle = thread::spawn(move || running.execute());
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(cycle.state(), CycleState::Running);

    cycle.terminate().unwrap();
    assert_eq!(cycle.state(), CycleState::Terminated);
    assert!(interrupted.load(Ordering::SeqCst));
    assert!(matches!(handle.join().unwrap(), Err(EngineError::Cancelled)));
    assert_eq!(cycle.state(), CycleState::Terminated);
}

#[test]
fn test_terminate_reports_timeout_for_uncooperative_node() {
    let (tx, rx) = mpsc::channel();
    let started = Mutex::new(tx);
    let f = FnCalculation::new("stubborn", move |_: &CalculationContext<'_>| {
        let _ = started.lock().send(());
        thread::sleep(Duration::from_millis(400));
        Ok(ValueMap::new())
    });
    let mut builder = DependencyGraph::builder("stubborn");
    builder.add_node("stubborn", TargetSpecification::primitive("Trade", "T1"), [], [spec("S")], Arc::new(f));
    let cycle = Arc::new(ComputationCycle::new(
        vec![Arc::new(builder.build().unwrap())],
        executor(1),
        Arc::new(InMemoryMarketDataProvider::new("base")),
        empty_resolver(),
        CycleOptions::default().terminate_timeout(Duration::from_millis(20)),
    ));

    let running = cycle.clone();
    let handle = thread::spawn(move || running.execute());
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(matches!(cycle.terminate(), Err(EngineError::Timeout { .. })));
    assert_eq!(cycle.state(), CycleState::Terminated);
    assert!(handle.join().unwrap().is_err());
    assert_eq!(cycle.state(), CycleState::Terminated);
}

/// Outputs the resolved name of the node's target.
fn name_of(output: ValueSpecification) -> impl Fn(&CalculationContext<'_>) -> Result<ValueMap, String> + Send + Sync {
    move |ctx: &CalculationContext<'_>| {
        let name = ctx.resolve_target().and_then(|t| t.name()).map_err(|e| e.to_string())?;
        Ok([(output.clone(), Value::text(&name))].into_iter().collect())
    }
}

#[test]
fn test_resolution_stays_on_first_pin_within_cycle() {
    let source = Arc::new(InMemoryEntitySource::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let oid = ObjectId::new("Sec", "AAPL");
    source.store(Entity::new(TargetType::Security, oid.clone(), "Apple v1"), t0(), t0());
    let security = TargetSpecification::new(TargetType::Security, oid.at_latest());
    let resolver = TargetResolver::builder(source.clone()).clock(clock.clone()).build();

    let first_output = spec("FirstName");
    let first = name_of(first_output.clone());
    let (amend_source, amend_clock, amend_oid) = (source.clone(), clock.clone(), oid.clone());
    let first_then_amend = FnCalculation::new("first", move |ctx: &CalculationContext<'_>| {
        let values = first(ctx)?;
        // A correction lands mid-cycle.
        amend_clock.advance(ChronoDuration::minutes(5));
        amend_source.store(
            Entity::new(TargetType::Security, amend_oid.clone(), "Apple v2"),
            t0(),
            amend_clock.now(),
        );
        Ok(values)
    });

    let mut builder = DependencyGraph::builder("names");
    builder.add_node("first", security.clone(), [], [first_output.clone()], Arc::new(first_then_amend));
    builder.add_node(
        "second",
        security.clone(),
        [first_output],
        [spec("SecondName")],
        Arc::new(FnCalculation::new("second", name_of(spec("SecondName")))),
    );

    let cycle = ComputationCycle::new(
        vec![Arc::new(builder.build().unwrap())],
        executor(2),
        Arc::new(InMemoryMarketDataProvider::new("base")),
        resolver.clone(),
        CycleOptions::default(),
    );
    let result = cycle.execute().unwrap();
    assert_eq!(result.value(&spec("FirstName")), ValueOutcome::Computed(Value::text("Apple v1")));
    assert_eq!(result.value(&spec("SecondName")), ValueOutcome::Computed(Value::text("Apple v1")));
    assert_eq!(result.version_correction, VersionCorrection::of(t0(), t0()));

    // A new resolution outside the cycle sees the correction.
    let fresh = resolver.resolve(&security, VersionCorrection::LATEST).unwrap();
    assert_eq!(fresh.name().unwrap(), "Apple v2");
}

#[test]
fn test_unused_lazy_container_is_never_fetched() {
    let source = Arc::new(InMemoryEntitySource::new());
    let node_oid = ObjectId::new("Node", "root");
    let portfolio_oid = ObjectId::new("Port", "EQ");
    source.store(Entity::new(TargetType::PortfolioNode, node_oid.clone(), "Root"), t0(), t0());
    source.store(
        Entity::new(TargetType::Portfolio, portfolio_oid.clone(), "Equities")
            .with_child(TargetSpecification::new(TargetType::PortfolioNode, node_oid.at_latest())),
        t0(),
        t0(),
    );
    let resolver = TargetResolver::builder(source.clone())
        .lazy(TargetType::Portfolio, vec![TargetType::PortfolioNode])
        .build();
    let portfolio = TargetSpecification::new(TargetType::Portfolio, portfolio_oid.at_latest());

    let identify = FnCalculation::new("identify", |ctx: &CalculationContext<'_>| {
        let target = ctx.resolve_target().map_err(|e| e.to_string())?;
        let output = ValueSpecification::new("TargetId", ctx.target().clone());
        Ok([(output, Value::text(&target.specification().id.to_string()))].into_iter().collect::<ValueMap>())
    });
    let mut builder = DependencyGraph::builder("identify");
    builder.add_node(
        "identify",
        portfolio.clone(),
        [],
        [ValueSpecification::new("TargetId", portfolio)],
        Arc::new(identify),
    );

    let cycle = ComputationCycle::new(
        vec![Arc::new(builder.build().unwrap())],
        executor(1),
        Arc::new(InMemoryMarketDataProvider::new("base")),
        resolver,
        CycleOptions::default(),
    );
    assert!(cycle.execute().unwrap().is_success());
    assert_eq!(source.fetch_count(), 0);
}

#[test]
fn test_cycle_snapshot_prefers_shock_layers() {
    let shock_a = Arc::new(InMemoryMarketDataProvider::new("shockA").with_value(quote("X"), Value::Scalar(1.0)));
    let shock_b = Arc::new(
        InMemoryMarketDataProvider::new("shockB")
            .with_value(quote("X"), Value::Scalar(2.0))
            .with_value(quote("Y"), Value::Scalar(2.0)),
    );
    let base = Arc::new(
        InMemoryMarketDataProvider::new("base")
            .with_value(quote("X"), Value::Scalar(3.0))
            .with_value(quote("Y"), Value::Scalar(3.0))
            .with_value(quote("Z"), Value::Scalar(3.0)),
    );
    let composite: Arc<dyn MarketDataProvider> = Arc::new(CompositeProvider::compose(base, vec![shock_a, shock_b]));

    let mut builder = DependencyGraph::builder("quotes");
    builder.add_node(
        "total",
        TargetSpecification::primitive("Trade", "T1"),
        [quote("X"), quote("Y"), quote("Z")],
        [spec("Total")],
        summing(spec("Total")),
    );
    let cycle = ComputationCycle::new(
        vec![Arc::new(builder.build().unwrap())],
        executor(1),
        composite,
        empty_resolver(),
        CycleOptions::default(),
    );
    let result = cycle.execute().unwrap();

    assert_eq!(result.snapshot.source_of(&quote("X")), Some("shockA"));
    assert_eq!(result.snapshot.source_of(&quote("Y")), Some("shockB"));
    assert_eq!(result.snapshot.source_of(&quote("Z")), Some("base"));
    // 1 + 2 + 3, plus one from the node itself.
    assert_eq!(result.value(&spec("Total")), ValueOutcome::Computed(Value::Scalar(7.0)));
    assert!(result.validation.is_empty());
}
