//! Driver contract: sequential/queued equivalence, failure propagation,
//! cancellation, and resource limits.

use spindle::{CancelToken, Context, Driver, Error, Limits, MemoryStore, Queued, RunErrorKind, Sequential, Value};

fn fan_out_blueprint(width: i64) -> spindle::Blueprint {
    let mut ctx = Context::new();
    ctx.define("def square(i):\n    return i * i\n").unwrap();
    let gather = ctx
        .define(
            r"
def gather(n):
    return sum(squares)
    with ...:
        squares = [square(i) for i in range(n)]
",
        )
        .unwrap();
    gather.blueprint(vec![width.into()]).unwrap()
}

#[test]
fn sequential_and_queued_agree() {
    let blueprint = fan_out_blueprint(8);

    let seq_store = MemoryStore::new();
    let seq = blueprint.run(&Sequential::new(), &seq_store).unwrap();

    let queued_store = MemoryStore::new();
    let queued = blueprint.run(&Queued::new(4), &queued_store).unwrap();

    assert_eq!(seq, queued);
    assert_eq!(seq, Value::Int((0..8).map(|i| i * i).sum()));
    assert_eq!(seq_store.len(), queued_store.len());
}

#[test]
fn queued_driver_skips_completed_nodes_on_rerun() {
    let blueprint = fan_out_blueprint(5);
    let store = MemoryStore::new();

    let first = blueprint.run(&Queued::new(3), &store).unwrap();
    let entries = store.len();
    let second = blueprint.run(&Queued::new(3), &store).unwrap();

    assert_eq!(first, second);
    assert_eq!(store.len(), entries);
}

#[test]
fn user_failures_propagate_and_stop_scheduling() {
    let mut ctx = Context::new();
    ctx.define("def ok():\n    return 1\n").unwrap();
    ctx.define("def boom():\n    return 1 // 0\n").unwrap();
    let w = ctx
        .define("def w():\n    return a + b\n    with ...:\n        a = ok()\n        b = boom()\n")
        .unwrap();

    let blueprint = w.blueprint(vec![]).unwrap();
    for driver in [&Sequential::new() as &dyn Driver, &Queued::new(2)] {
        let err = blueprint.run(driver, &MemoryStore::new()).unwrap_err();
        match err {
            Error::Runtime(run_error) => assert_eq!(run_error.kind, RunErrorKind::ZeroDivision),
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }
}

#[test]
fn cancellation_is_observed_between_dispatches() {
    let blueprint = fan_out_blueprint(6);

    let token = CancelToken::new();
    token.cancel();

    let sequential = Sequential::new().with_cancel(token.clone());
    assert!(matches!(
        blueprint.run(&sequential, &MemoryStore::new()),
        Err(Error::Cancelled)
    ));

    let queued = Queued::new(2).with_cancel(token);
    assert!(matches!(blueprint.run(&queued, &MemoryStore::new()), Err(Error::Cancelled)));
}

#[test]
fn operation_limits_abort_runaway_bodies() {
    let mut ctx = Context::new();
    let spin = ctx
        .define("def spin():\n    n = 0\n    while True:\n        n += 1\n    return n\n")
        .unwrap();

    let blueprint = spin.blueprint(vec![]).unwrap();
    let driver = Sequential::new().with_limits(Limits {
        max_operations: 10_000,
        max_recursion: 64,
    });
    let err = blueprint.run(&driver, &MemoryStore::new()).unwrap_err();
    match err {
        Error::Runtime(run_error) => assert_eq!(run_error.kind, RunErrorKind::Resource),
        other => panic!("expected a resource error, got {other:?}"),
    }
}

#[test]
fn results_substitute_across_worker_boundaries() {
    // A three-layer workflow: the queued driver must only dispatch a node
    // once all of its predecessors' results are loadable.
    let mut ctx = Context::new();
    ctx.define("def base(i):\n    return i + 1\n").unwrap();
    ctx.define("def combine(x, y):\n    return x * y\n").unwrap();
    let top = ctx
        .define(
            r"
def top():
    return c
    with ...:
        a = base(1)
        b = base(2)
        c = combine(a, b)
",
        )
        .unwrap();

    let blueprint = top.blueprint(vec![]).unwrap();
    assert_eq!(blueprint.run(&Queued::new(4), &MemoryStore::new()).unwrap(), Value::Int(6));
}
