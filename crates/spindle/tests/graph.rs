//! Blueprint graph structure: expected edge sets, sink/acyclicity invariants,
//! and node identity across call sites.

use std::collections::HashSet;

use spindle::{CallNode, Context, Deferred, Error, Value};

fn edge_set(edges: Vec<(CallNode, CallNode)>) -> HashSet<(CallNode, CallNode)> {
    edges.into_iter().collect()
}

fn deferred(node: CallNode) -> Value {
    Deferred::new(node).into()
}

#[test]
fn comprehension_workflow_builds_the_expected_graph() {
    let mut ctx = Context::new();
    ctx.define("def sign(msg, signed='by-test'):\n    return msg\n").unwrap();
    ctx.define("def message(num):\n    return num\n").unwrap();
    let messages = ctx
        .define(
            r"
def messages(msg_count):
    with ...:
        sign(message('3 messages'))
        messages = [message(i) for i in range(msg_count)]
        [sign(m) for m in messages]
",
        )
        .unwrap();

    let blueprint = messages.blueprint(vec![3.into()]).unwrap();

    let entry = CallNode::new("messages", vec![3.into()]);
    let headline = CallNode::new("message", vec!["3 messages".into()]);
    let signed_headline = CallNode::new("sign", vec![deferred(headline.clone())]);
    let mut expected = vec![
        (headline.clone(), signed_headline.clone()),
        (signed_headline, entry.clone()),
    ];
    for i in 0..3 {
        let message = CallNode::new("message", vec![i.into()]);
        let signed = CallNode::new("sign", vec![deferred(message.clone())]);
        expected.push((message, signed.clone()));
        expected.push((signed, entry.clone()));
    }

    assert_eq!(blueprint.entry, entry);
    assert_eq!(edge_set(blueprint.graph.edges()), edge_set(expected));
    assert_eq!(blueprint.graph.len(), 9);
}

#[test]
fn diamond_workflow_composes_per_function_graphs() {
    let mut ctx = Context::new();
    ctx.define("def start():\n    return 2\n").unwrap();
    for name in ["a", "b", "c"] {
        ctx.define(&format!(
            "def {name}():\n    return ['{name}'] * repetitions\n    with ...:\n        repetitions = start()\n"
        ))
        .unwrap();
    }
    let end = ctx
        .define(
            r"
def end():
    return _a + _b + _c
    with ...:
        _a = a()
        _b = b()
        _c = c()
",
        )
        .unwrap();

    let blueprint = end.blueprint(vec![]).unwrap();

    let node = |name: &str| CallNode::new(name, vec![]);
    let expected = vec![
        (node("start"), node("a")),
        (node("start"), node("b")),
        (node("start"), node("c")),
        (node("a"), node("end")),
        (node("b"), node("end")),
        (node("c"), node("end")),
    ];

    assert!(blueprint.graph.is_acyclic());
    assert_eq!(edge_set(blueprint.graph.edges()), edge_set(expected));

    use spindle::{MemoryStore, Sequential};
    let result = blueprint.run(&Sequential::new(), &MemoryStore::new()).unwrap();
    let expected: Vec<Value> = ["a", "a", "b", "b", "c", "c"].iter().map(|s| (*s).into()).collect();
    assert_eq!(result, Value::list(expected));
}

#[test]
fn entry_node_is_always_a_sink() {
    let mut ctx = Context::new();
    ctx.define("def leaf():\n    return 1\n").unwrap();
    let top = ctx
        .define("def top():\n    return x\n    with ...:\n        x = leaf()\n")
        .unwrap();

    let blueprint = top.blueprint(vec![]).unwrap();
    assert!(blueprint.graph.successors(&blueprint.entry).is_empty());
    assert!(!blueprint.graph.predecessors(&blueprint.entry).is_empty());
}

#[test]
fn identical_calls_collapse_into_one_node() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 'a'\n").unwrap();
    ctx.define("def g(v, other='b'):\n    return v + other\n").unwrap();
    let h = ctx
        .define(
            r"
def h():
    return r + s
    with ...:
        r = g(f())
        s = g(g(f()), other=f())
",
        )
        .unwrap();

    let blueprint = h.blueprint(vec![]).unwrap();

    // f() appears three times in the source but is one node; g(f()) twice.
    let f = CallNode::new("f", vec![]);
    let inner_g = CallNode::new("g", vec![deferred(f.clone())]);
    let outer_g = CallNode::new("g", vec![deferred(inner_g.clone()), deferred(f.clone())]);
    assert!(blueprint.graph.nodes().any(|n| *n == f));
    assert!(blueprint.graph.nodes().any(|n| *n == inner_g));
    assert!(blueprint.graph.nodes().any(|n| *n == outer_g));
    assert_eq!(blueprint.graph.len(), 4);
}

#[test]
fn cyclic_constants_statements_are_rejected() {
    let mut ctx = Context::new();
    ctx.define("def g(v):\n    return v\n").unwrap();
    let err = ctx
        .define("def h():\n    return a\n    with ...:\n        a = g(b)\n        b = g(a)\n")
        .unwrap_err();

    assert!(matches!(err, Error::NotDag(_)), "got {err:?}");
}

#[test]
fn blueprints_survive_serialization() {
    let mut ctx = Context::new();
    ctx.define("def f():\n    return 40\n").unwrap();
    let top = ctx
        .define("def top(extra):\n    return x + extra\n    with ...:\n        x = f()\n")
        .unwrap();

    let blueprint = top.blueprint(vec![2.into()]).unwrap();
    let bytes = postcard::to_allocvec(&blueprint).unwrap();
    let restored: spindle::Blueprint = postcard::from_bytes(&bytes).unwrap();

    assert_eq!(restored, blueprint);

    use spindle::{MemoryStore, Sequential};
    let result = restored.run(&Sequential::new(), &MemoryStore::new()).unwrap();
    assert_eq!(result, Value::Int(42));
}
