//! Blueprint assembly: one concrete call of a workflow function, expanded
//! into the whole-workflow DAG plus every image needed to execute it.

use ahash::AHashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    driver::Driver,
    error::{Error, Result},
    function::FunctionImage,
    graph::{CallGraph, CallNode},
    resource::{Limits, Tracker},
    store::Store,
    value::Value,
};

/// A self-contained, serializable execution plan.
///
/// Invariants: the graph is acyclic, every reachable call node is present in
/// it, and the entry node is a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub entry: CallNode,
    pub graph: CallGraph,
    pub images: IndexMap<String, FunctionImage>,
}

impl Blueprint {
    /// Executes this blueprint: sugar for `driver.execute(self, store)`.
    pub fn run(&self, driver: &dyn Driver, store: &dyn Store) -> Result<Value> {
        driver.execute(self, store)
    }
}

/// Builds the blueprint for `entry_image(args, kwargs)`.
pub(crate) fn build(entry_image: &FunctionImage, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Blueprint> {
    let mut tracker = Tracker::new(Limits::default());

    let (args, kwargs) = entry_image.signature().normalize(args, kwargs)?;
    let entry = CallNode::with_kwargs(entry_image.name(), args, kwargs);
    if !entry.is_ground() {
        return Err(Error::Invalid("blueprint arguments must be ground values".to_owned()));
    }

    let mut images = IndexMap::new();
    collect_images(entry_image, &mut images)?;

    // Expand each reachable call once: its builder contributes a local graph,
    // merged by union. New nodes discovered along the way join the worklist.
    let mut graph = CallGraph::new();
    graph.add_node(entry.clone());
    let mut pending = vec![entry.clone()];
    let mut expanded = AHashSet::new();
    while let Some(node) = pending.pop() {
        if !expanded.insert(node.clone()) {
            continue;
        }
        tracker.tick()?;
        let image = images
            .get(&node.function)
            .ok_or_else(|| Error::MissingFunction(node.function.clone()))?;
        let local = image.build_local_graph(&node, &mut tracker)?;
        for discovered in local.nodes() {
            if !graph.contains(discovered) {
                pending.push(discovered.clone());
            }
        }
        graph.merge_from(&local);
    }

    // Composition may close a loop even when every local graph is sound.
    graph.topo_indices()?;

    debug!(entry = %entry, nodes = graph.len(), "built blueprint");
    Ok(Blueprint { entry, graph, images })
}

/// Packages the transitive closure of images by function name. Two distinct
/// versions of the same name cannot execute in one workflow.
fn collect_images(image: &FunctionImage, out: &mut IndexMap<String, FunctionImage>) -> Result<()> {
    match out.get(image.name()) {
        Some(existing) if existing.hash() == image.hash() => return Ok(()),
        Some(_) => {
            return Err(Error::Invalid(format!(
                "conflicting versions of `{}` in one workflow",
                image.name()
            )));
        }
        None => {}
    }
    out.insert(image.name().to_owned(), image.clone());
    for dependency in image.dependencies().values() {
        collect_images(dependency, out)?;
    }
    Ok(())
}
