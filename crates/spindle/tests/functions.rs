//! End-to-end workflow scenarios: definition, decomposition, graph building,
//! and execution against an in-memory store.

use pretty_assertions::assert_eq;
use spindle::{Blueprint, Context, Error, MemoryStore, Sequential, Value};

fn run(blueprint: &Blueprint) -> Value {
    blueprint.run(&Sequential::new(), &MemoryStore::new()).unwrap()
}

// ============================================================================
// Structured unpacking
// ============================================================================

#[test]
fn structured_unpacking_with_arguments() {
    let mut ctx = Context::new();
    ctx.define("def f(a, b):\n    return (a, b), 'c'\n").unwrap();
    ctx.define("def g(v):\n    return v * 2\n").unwrap();
    let h = ctx
        .define(
            r"
def h():
    with ...:
        (a, b), c = f('a', b='b')
        new_b = g(b)
    return a + new_b + c
",
        )
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("abbc"));
}

#[test]
fn structured_unpacking_list_targets() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return ('a', ('b', 'c'))\n").unwrap();
    let h = ctx
        .define("def h():\n    with ...:\n        [a, [b, c]] = f()\n    return a + b + c\n")
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("abc"));
}

#[test]
fn starred_unpacking_from_list() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return [1, 2, 3, 4, 5, 6]\n").unwrap();
    let h = ctx
        .define("def h():\n    with ...:\n        head, *body, foot = f()\n    return head, body, foot\n")
        .unwrap();

    let expected = Value::tuple(vec![
        1.into(),
        Value::list(vec![2.into(), 3.into(), 4.into(), 5.into()]),
        6.into(),
    ]);
    assert_eq!(run(&h.blueprint(vec![]).unwrap()), expected);
}

#[test]
fn starred_unpacking_then_body_unpacks_the_rest() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 'a', 'b', 'c', 'd'\n").unwrap();
    let h = ctx
        .define(
            r"
def h():
    with ...:
        a, *bc, d = f()
    b, c = bc
    return a + b + c + d
",
        )
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("abcd"));
}

#[test]
fn deeply_nested_starred_unpacking() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return ('a', ('b', 'c', 'd'), 'e', 'g')\n").unwrap();
    let h = ctx
        .define(
            r"
def h():
    with ...:
        a, (b, *cd), *eg = f()
    c, d = cd
    e, g = eg
    return a + b + c + d + e + g
",
        )
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("abcdeg"));
}

// ============================================================================
// Nested and subscripted calls
// ============================================================================

#[test]
fn nested_calls_share_identical_nodes() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 'a'\n").unwrap();
    ctx.define("def g(v, other='b'):\n    return v + other\n").unwrap();
    let h = ctx
        .define(
            r"
def h():
    with ...:
        r = g(f())
        s = g(g(f()), other=f())
    return r + '_' + s
",
        )
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("ab_aba"));
}

#[test]
fn nested_call_as_argument() {
    let mut ctx = Context::new();
    ctx.define("def f(arg):\n    return 'a', 'b', arg\n").unwrap();
    ctx.define("def g():\n    return 'c'\n").unwrap();
    let h = ctx
        .define("def h():\n    with ...:\n        a, b, c = f(g())\n    return a + b + c\n")
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("abc"));
}

#[test]
fn subscripted_call_result() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 'a', 'b'\n").unwrap();
    let h = ctx
        .define("def h():\n    with ...:\n        b = f()[1]\n    return b\n")
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("b"));
}

#[test]
fn sliced_and_chained_projections() {
    let mut ctx = Context::new();
    ctx.define("def g():\n    return 'a', 'b', ('c', 'd')\n").unwrap();
    let h = ctx
        .define(
            r"
def h():
    with ...:
        a, b = g()[:2]
        c, d = g()[2][0:2]
        e, f = ('d', ('e', 'f'))[1]
    return a + b + c + d + e + f
",
        )
        .unwrap();

    assert_eq!(run(&h.blueprint(vec![]).unwrap()), Value::from("abcdef"));
}

// ============================================================================
// Symbolic results flowing through containers and variables
// ============================================================================

#[test]
fn symbolic_result_in_dictionary() {
    let mut ctx = Context::new();
    ctx.define("def g():\n    return 'a'\n").unwrap();
    ctx.define("def h():\n    return 'b'\n").unwrap();
    let f = ctx
        .define(
            r"
def f():
    return params
    with ...:
        params = {
            'direct': g(),
            'indirect': indirect_value
        }
        indirect_value = h()
",
        )
        .unwrap();

    let expected = Value::dict(vec![
        ("direct".into(), "a".into()),
        ("indirect".into(), "b".into()),
    ])
    .unwrap();
    assert_eq!(run(&f.blueprint(vec![]).unwrap()), expected);
}

#[test]
fn symbolic_result_in_variable() {
    let mut ctx = Context::new();
    ctx.define("def g():\n    return 'a'\n").unwrap();
    ctx.define("def h():\n    return 'b'\n").unwrap();
    let f = ctx
        .define(
            r"
def f():
    return a + b
    with ...:
        a = g()
        b = indirect_value
        indirect_value = h()
",
        )
        .unwrap();

    assert_eq!(run(&f.blueprint(vec![]).unwrap()), Value::from("ab"));
}

#[test]
fn comprehension_fans_out_into_per_element_calls() {
    let mut ctx = Context::new();
    ctx.define("def double(i):\n    return i * 2\n").unwrap();
    let total = ctx
        .define(
            r"
def total(n):
    return sum(values)
    with ...:
        values = [double(i) for i in range(n)]
",
        )
        .unwrap();

    assert_eq!(run(&total.blueprint(vec![4.into()]).unwrap()), Value::Int(12));
}

// ============================================================================
// Parameters, defaults, closures, and return conventions
// ============================================================================

#[test]
fn keyword_arguments_pass_through_the_graph() {
    let mut ctx = Context::new();
    ctx.define("def f(a, b=None):\n    return b if b is not None else a\n").unwrap();
    let g = ctx
        .define("def g(a, b=None):\n    return r\n    with ...:\n        r = f(a=a, b=b)\n")
        .unwrap();

    assert_eq!(run(&g.blueprint(vec![1.into()]).unwrap()), Value::Int(1));
    assert_eq!(run(&g.blueprint(vec![1.into(), 2.into()]).unwrap()), Value::Int(2));
}

#[test]
fn module_globals_are_captured_by_value() {
    let mut ctx = Context::new();
    ctx.set_global("a", 11.into());
    let f = ctx.define("def f():\n    return a\n").unwrap();

    // Mutating the context later must not affect the frozen image.
    ctx.set_global("a", 99.into());

    assert_eq!(run(&f.blueprint(vec![]).unwrap()), Value::Int(11));
}

#[test]
fn empty_workflow_function_returns_none() {
    let mut ctx = Context::new();
    ctx.define("def g():\n    return 'a'\n").unwrap();
    let f = ctx.define("def f():\n    with ...:\n        g()\n").unwrap();

    assert_eq!(run(&f.blueprint(vec![]).unwrap()), Value::None);
}

#[test]
fn single_bare_expression_is_the_return_value() {
    let mut ctx = Context::new();
    ctx.define("def g():\n    return 20\n").unwrap();
    let f = ctx.define("def f():\n    r + 1\n    with ...:\n        r = g()\n").unwrap();

    assert_eq!(run(&f.blueprint(vec![]).unwrap()), Value::Int(21));
}

#[test]
fn body_control_flow_runs_on_loaded_values() {
    let mut ctx = Context::new();
    ctx.define("def seed():\n    return [3, 1, 2]\n").unwrap();
    let f = ctx
        .define(
            r"
def f():
    acc = 0
    for v in sorted(values):
        if v == 2:
            continue
        acc += v
    return acc
    with ...:
        values = seed()
",
        )
        .unwrap();

    assert_eq!(run(&f.blueprint(vec![]).unwrap()), Value::Int(4));
}

// ============================================================================
// Rejected definitions
// ============================================================================

#[test]
fn copying_a_deferred_result_into_ordinary_code_fails() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 1\n").unwrap();
    let err = ctx
        .define("def g():\n    return b\n    with ...:\n        a = f()\n        b = len(a)\n")
        .unwrap_err();

    assert!(matches!(err, Error::Copy(_)), "got {err:?}");
}

#[test]
fn two_constants_blocks_are_rejected() {
    let mut ctx = Context::new();
    let err = ctx
        .define("def f():\n    with ...:\n        pass\n    with ...:\n        pass\n")
        .unwrap_err();

    assert!(matches!(err, Error::Invalid(_)), "got {err:?}");
}

#[test]
fn mutation_inside_the_block_is_rejected() {
    let mut ctx = Context::new();
    let subscript_store = ctx.define("def f():\n    with ...:\n        L = [1]\n        L[0] = 2\n");
    assert!(matches!(subscript_store, Err(Error::Invalid(_))));

    let augmented = ctx.define("def g():\n    with ...:\n        a = 1\n        a += 1\n");
    assert!(matches!(augmented, Err(Error::Invalid(_))));
}

#[test]
fn reassigning_a_workflow_function_is_rejected() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 'f'\n").unwrap();
    let err = ctx
        .define("def h():\n    return f\n    with ...:\n        f = f()\n")
        .unwrap_err();

    assert!(matches!(err, Error::Syntax(_)), "got {err:?}");
}

#[test]
fn multiple_assignment_targets_are_rejected() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 'a', 'b'\n").unwrap();
    let err = ctx
        .define("def h():\n    return r\n    with ...:\n        r = a, b = f()\n")
        .unwrap_err();

    assert!(matches!(err, Error::Invalid(_)), "got {err:?}");
}

#[test]
fn operators_on_deferred_results_are_rejected() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 1\n").unwrap();
    let err = ctx
        .define("def g():\n    return a\n    with ...:\n        a = f() + 1\n")
        .unwrap_err();

    assert!(matches!(err, Error::Syntax(_)), "got {err:?}");
}

#[test]
fn unbound_names_in_the_block_are_context_errors() {
    let mut ctx = Context::new();
    let err = ctx
        .define("def f():\n    return a\n    with ...:\n        a = missing\n")
        .unwrap_err();

    assert!(matches!(err, Error::Context(name) if name == "missing"), "wrong error");
}

#[test]
fn calling_an_unknown_function_in_the_block_fails() {
    let mut ctx = Context::new();
    let err = ctx
        .define("def f():\n    return a\n    with ...:\n        a = undefined_step()\n")
        .unwrap_err();

    assert!(matches!(err, Error::MissingFunction(name) if name == "undefined_step"), "wrong error");
}

#[test]
fn runtime_name_errors_stay_runtime() {
    // An unbound name in the body is a run-time failure, not a definition
    // error: the body is ordinary user code.
    let mut ctx = Context::new();
    let f = ctx.define("def f():\n    return missing\n").unwrap();
    let err = f
        .blueprint(vec![])
        .unwrap()
        .run(&Sequential::new(), &MemoryStore::new())
        .unwrap_err();

    assert!(matches!(err, Error::Runtime(_)), "got {err:?}");
}
