//! Versioning laws and store behavior: hash stability across redefinition,
//! dependency propagation, version completeness, and the disk store.

use indexmap::IndexMap;
use spindle::{CallNode, Context, DiskStore, FunctionImage, MemoryStore, Sequential, StoreAccessor, Value};

// ============================================================================
// Hashing laws
// ============================================================================

#[test]
fn redefinition_hashes_follow_source_and_dependencies() {
    let mut ctx = Context::new();
    let f0 = ctx.define("def f():\n    pass\n").unwrap();
    let g0 = ctx.define("def g():\n    with ...:\n        f()\n").unwrap();

    // Byte-identical redefinition: same hash.
    let g1 = ctx.define("def g():\n    with ...:\n        f()\n").unwrap();
    assert_eq!(g1.hash(), g0.hash());

    // Different source under the same name: different hash.
    let f1 = ctx.define("def f():\n    return 0\n").unwrap();
    assert_ne!(f1.hash(), f0.hash());

    // Identical source, but the dependency changed underneath: different hash.
    let g2 = ctx.define("def g():\n    with ...:\n        f()\n").unwrap();
    assert_ne!(g2.hash(), g0.hash());
}

#[test]
fn redefining_an_unrelated_sibling_keeps_the_hash() {
    let mut ctx = Context::new();
    ctx.define("def sibling():\n    return 1\n").unwrap();
    ctx.define("def f():\n    return 2\n").unwrap();
    let g0 = ctx.define("def g():\n    return r\n    with ...:\n        r = f()\n").unwrap();

    ctx.define("def sibling():\n    return 999\n").unwrap();
    let g1 = ctx.define("def g():\n    return r\n    with ...:\n        r = f()\n").unwrap();

    assert_eq!(g0.hash(), g1.hash());
}

#[test]
fn closure_values_participate_in_identity() {
    let mut ctx = Context::new();
    ctx.set_global("k", 1.into());
    let f0 = ctx.define("def f():\n    return k\n").unwrap();

    ctx.set_global("k", 2.into());
    let f1 = ctx.define("def f():\n    return k\n").unwrap();

    assert_ne!(f0.hash(), f1.hash());
}

// ============================================================================
// Version completeness
// ============================================================================

#[test]
fn completed_versions_accumulate_across_redefinitions() {
    let driver = Sequential::new();
    let store = MemoryStore::new();
    let accessor = StoreAccessor::new(&store);

    let mut ctx = Context::new();
    let f0 = ctx.define("def f():\n    return 0\n").unwrap();
    let w0 = ctx
        .define("def workflow():\n    return r\n    with ...:\n        r = f()\n")
        .unwrap();

    let f_node = CallNode::new("f", vec![]);
    let w_node = CallNode::new("workflow", vec![]);

    assert!(!accessor.completed(&f_node, f0.hash()).unwrap());
    assert!(!accessor.completed(&w_node, w0.hash()).unwrap());

    let r0 = w0.blueprint(vec![]).unwrap().run(&driver, &store).unwrap();
    assert_eq!(r0, Value::Int(0));
    assert!(accessor.completed(&f_node, f0.hash()).unwrap());
    assert!(accessor.completed(&w_node, w0.hash()).unwrap());

    // Redefine f and pin the old workflow description to the new dependency.
    let f1 = ctx.define("def f():\n    return 1\n").unwrap();
    let mut deps = IndexMap::new();
    deps.insert("f".to_owned(), f1.clone());
    let w1 = FunctionImage::from_parts(w0.description().clone(), deps).unwrap();

    assert!(!accessor.completed(&f_node, f1.hash()).unwrap());
    assert!(!accessor.completed(&w_node, w1.hash()).unwrap());

    let r1 = w1.blueprint(vec![]).unwrap().run(&driver, &store).unwrap();
    assert_eq!(r1, Value::Int(1));

    // Older entries are retained alongside the new ones.
    assert!(accessor.completed(&f_node, f0.hash()).unwrap());
    assert!(accessor.completed(&w_node, w0.hash()).unwrap());
    assert!(accessor.completed(&f_node, f1.hash()).unwrap());
    assert!(accessor.completed(&w_node, w1.hash()).unwrap());

    // Force a rerun of the old workflow under a scrambled version hash: it
    // must load f's result under f0's hash, not the latest one.
    let w0_scrambled = w0.clone().with_hash(w0.hash().xor(&w1.hash()));
    let r2 = w0_scrambled.blueprint(vec![]).unwrap().run(&driver, &store).unwrap();
    assert_eq!(r2, Value::Int(0));
}

#[test]
fn reruns_skip_completed_work() {
    let mut ctx = Context::new();
    ctx.define("def f(n):\n    return n * n\n").unwrap();
    let w = ctx
        .define("def w(n):\n    return a + b\n    with ...:\n        a = f(n)\n        b = f(n + 1)\n")
        .unwrap();

    let store = MemoryStore::new();
    let driver = Sequential::new();
    let blueprint = w.blueprint(vec![3.into()]).unwrap();

    assert_eq!(blueprint.run(&driver, &store).unwrap(), Value::Int(25));
    let entries_after_first_run = store.len();

    // Second run: identical results, nothing new stored.
    assert_eq!(blueprint.run(&driver, &store).unwrap(), Value::Int(25));
    assert_eq!(store.len(), entries_after_first_run);

    // An overlapping workflow reuses the shared node.
    let blueprint = w.blueprint(vec![4.into()]).unwrap();
    assert_eq!(blueprint.run(&driver, &store).unwrap(), Value::Int(41));
}

// ============================================================================
// Disk store
// ============================================================================

#[test]
fn disk_store_round_trips_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::new(dir.path()).unwrap();

    let mut ctx = Context::new();
    ctx.define("def f():\n    return {'answer': 42}\n").unwrap();
    let w = ctx
        .define("def w():\n    return data['answer']\n    with ...:\n        data = f()\n")
        .unwrap();

    let blueprint = w.blueprint(vec![]).unwrap();
    assert_eq!(blueprint.run(&Sequential::new(), &store).unwrap(), Value::Int(42));

    // A fresh store handle over the same directory sees the completed keys.
    let reopened = DiskStore::new(dir.path()).unwrap();
    let accessor = StoreAccessor::new(&reopened);
    let f_image = ctx.get("f").unwrap();
    assert!(accessor.completed(&CallNode::new("f", vec![]), f_image.hash()).unwrap());
    assert_eq!(blueprint.run(&Sequential::new(), &reopened).unwrap(), Value::Int(42));
}
