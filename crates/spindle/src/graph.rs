//! Call nodes and the workflow call graph.
//!
//! A [`CallNode`] is the immutable structural identifier of one deferred
//! invocation: function name plus fully evaluated arguments. Arguments may
//! themselves embed deferred references to other call nodes, which is how
//! nested calls compose. The [`CallGraph`] holds every call node of a workflow
//! with edges pointing from a dependency to its dependent, so the entry node
//! of a blueprint is always a sink.

use std::fmt;

use indexmap::IndexMap;
use petgraph::{
    Direction,
    algo::toposort,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    error::{Error, Result, RunError, RunErrorKind},
    hash::{ContentHash, Hasher},
    value::Value,
};

/// Immutable identifier of a single deferred call.
///
/// Equality and hashing are structural; keyword arguments compare
/// order-insensitively like Python dicts. A call node carries no execution
/// state whatsoever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNode {
    pub function: String,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

impl std::hash::Hash for CallNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher as _};

        self.function.hash(state);
        self.args.hash(state);
        let mut acc = 0u64;
        for (name, value) in &self.kwargs {
            let mut sub = DefaultHasher::new();
            name.hash(&mut sub);
            value.hash(&mut sub);
            acc ^= sub.finish();
        }
        state.write_u64(acc);
    }
}

impl CallNode {
    pub fn new(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            function: function.into(),
            args,
            kwargs: IndexMap::new(),
        }
    }

    pub fn with_kwargs(function: impl Into<String>, args: Vec<Value>, kwargs: IndexMap<String, Value>) -> Self {
        Self {
            function: function.into(),
            args,
            kwargs,
        }
    }

    /// True when no deferred reference occurs anywhere in the arguments.
    pub fn is_ground(&self) -> bool {
        let mut ground = true;
        self.for_each_deferred(&mut |_| ground = false);
        ground
    }

    /// Visits every deferred reference embedded in the arguments.
    pub fn for_each_deferred<'s>(&'s self, visit: &mut impl FnMut(&'s Deferred)) {
        for arg in &self.args {
            arg.for_each_deferred(visit);
        }
        for value in self.kwargs.values() {
            value.for_each_deferred(visit);
        }
    }

    /// Canonical content digest of this call node, used where a fixed-width
    /// key is needed (e.g. disk store file names).
    pub fn digest(&self) -> ContentHash {
        let mut hasher = Hasher::new("spindle.call");
        self.feed(&mut hasher);
        hasher.finish()
    }

    pub(crate) fn feed(&self, hasher: &mut Hasher) {
        hasher.update_str(&self.function);
        hasher.update_u64(self.args.len() as u64);
        for arg in &self.args {
            arg.feed(hasher);
        }
        let mut entries: Vec<_> = self
            .kwargs
            .iter()
            .map(|(name, value)| {
                let mut sub = Hasher::new("spindle.kwarg");
                sub.update_str(name);
                value.feed(&mut sub);
                sub.finish()
            })
            .collect();
        entries.sort_unstable();
        hasher.update_u64(entries.len() as u64);
        for entry in entries {
            hasher.update(entry.as_bytes());
        }
    }
}

impl fmt::Display for CallNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.function)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{arg}")?;
        }
        for (name, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        write!(f, ")")
    }
}

/// One projection step applied to a call's result before it is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStep {
    /// Subscript by a ground value: `f()[1]` or `f()['key']`.
    Index(Value),
    /// Slice with optional bounds: `f()[:2]`, `f()[1:]`.
    Slice(Option<i64>, Option<i64>),
    /// The starred slot of an unpacking: skips fixed leaves on either side and
    /// absorbs the slack in between as a list.
    Spread { skip: usize, skip_back: usize },
}

/// A symbolic reference to the future result of a call node, optionally
/// narrowed by a projection path.
///
/// The path is applied to the stored result at load time, which is also when
/// a starred projection learns the actual arity of the value it splits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deferred {
    pub node: CallNode,
    pub path: SmallVec<[PathStep; 2]>,
}

impl Deferred {
    pub fn new(node: CallNode) -> Self {
        Self {
            node,
            path: SmallVec::new(),
        }
    }

    /// Returns a copy narrowed by one more projection step.
    #[must_use]
    pub fn project(&self, step: PathStep) -> Self {
        let mut path = self.path.clone();
        path.push(step);
        Self {
            node: self.node.clone(),
            path,
        }
    }

    /// Applies the projection path to a materialized result.
    pub fn apply_path(&self, value: Value) -> Result<Value, RunError> {
        let mut current = value;
        for step in &self.path {
            current = match step {
                PathStep::Index(index) => current.index(index)?,
                PathStep::Slice(lower, upper) => current.slice(*lower, *upper)?,
                PathStep::Spread { skip, skip_back } => {
                    let items = current.elements()?;
                    if items.len() < skip + skip_back {
                        return Err(RunError::new(
                            RunErrorKind::Unpack,
                            format!("not enough values to unpack (expected at least {})", skip + skip_back),
                        ));
                    }
                    Value::List(items[*skip..items.len() - skip_back].to_vec())
                }
            };
        }
        Ok(current)
    }

    pub(crate) fn feed(&self, hasher: &mut Hasher) {
        self.node.feed(hasher);
        hasher.update_u64(self.path.len() as u64);
        for step in &self.path {
            match step {
                PathStep::Index(index) => {
                    hasher.tag(0);
                    index.feed(hasher);
                }
                PathStep::Slice(lower, upper) => {
                    hasher.tag(1);
                    hasher.update_u64(lower.unwrap_or(i64::MAX) as u64);
                    hasher.update_u64(upper.unwrap_or(i64::MAX) as u64);
                }
                PathStep::Spread { skip, skip_back } => {
                    hasher.tag(2);
                    hasher.update_u64(*skip as u64);
                    hasher.update_u64(*skip_back as u64);
                }
            }
        }
    }
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)?;
        for step in &self.path {
            match step {
                PathStep::Index(index) => write!(f, "[{index}]")?,
                PathStep::Slice(lower, upper) => {
                    write!(f, "[")?;
                    if let Some(lower) = lower {
                        write!(f, "{lower}")?;
                    }
                    write!(f, ":")?;
                    if let Some(upper) = upper {
                        write!(f, "{upper}")?;
                    }
                    write!(f, "]")?;
                }
                PathStep::Spread { skip, skip_back } => write!(f, "[*{skip}:-{skip_back}]")?,
            }
        }
        Ok(())
    }
}

/// Directed acyclic graph of call nodes, edges pointing dependency → dependent.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    graph: DiGraph<CallNode, ()>,
    index: IndexMap<CallNode, NodeIndex>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, node: &CallNode) -> bool {
        self.index.contains_key(node)
    }

    /// Inserts a node if not already present.
    pub fn add_node(&mut self, node: CallNode) {
        if !self.index.contains_key(&node) {
            let idx = self.graph.add_node(node.clone());
            self.index.insert(node, idx);
        }
    }

    /// Inserts an edge (and its endpoints if missing); duplicate edges are
    /// collapsed.
    pub fn add_edge(&mut self, from: &CallNode, to: &CallNode) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        let a = self.index[from];
        let b = self.index[to];
        self.graph.update_edge(a, b, ());
    }

    /// Union of nodes and edges from another graph.
    pub fn merge_from(&mut self, other: &Self) {
        for node in other.nodes() {
            self.add_node(node.clone());
        }
        for (from, to) in other.edges() {
            self.add_edge(&from, &to);
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CallNode> {
        self.index.keys()
    }

    pub fn edges(&self) -> Vec<(CallNode, CallNode)> {
        self.graph
            .edge_references()
            .map(|edge| (self.graph[edge.source()].clone(), self.graph[edge.target()].clone()))
            .collect()
    }

    pub fn predecessors(&self, node: &CallNode) -> Vec<&CallNode> {
        self.neighbors(node, Direction::Incoming)
    }

    pub fn successors(&self, node: &CallNode) -> Vec<&CallNode> {
        self.neighbors(node, Direction::Outgoing)
    }

    fn neighbors(&self, node: &CallNode, direction: Direction) -> Vec<&CallNode> {
        let Some(&idx) = self.index.get(node) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .map(|i| &self.graph[i])
            .collect()
    }

    /// Nodes with no outgoing edge.
    pub fn sinks(&self) -> Vec<CallNode> {
        self.graph
            .externals(Direction::Outgoing)
            .map(|i| self.graph[i].clone())
            .collect()
    }

    pub fn is_acyclic(&self) -> bool {
        toposort(&self.graph, None).is_ok()
    }

    /// A topological order over the node indices used by the drivers.
    pub(crate) fn topo_indices(&self) -> Result<Vec<usize>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(NodeIndex::index).collect())
            .map_err(|cycle| Error::NotDag(format!("cycle through {}", self.graph[cycle.node_id()])))
    }

    pub(crate) fn node_at(&self, index: usize) -> &CallNode {
        &self.graph[NodeIndex::new(index)]
    }

    pub(crate) fn successor_indices(&self, index: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(NodeIndex::index)
            .collect()
    }

    pub(crate) fn in_degrees(&self) -> Vec<usize> {
        self.graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect()
    }
}

impl PartialEq for CallGraph {
    fn eq(&self, other: &Self) -> bool {
        use ahash::AHashSet;

        if self.len() != other.len() {
            return false;
        }
        let nodes: AHashSet<&CallNode> = self.nodes().collect();
        if !other.nodes().all(|node| nodes.contains(node)) {
            return false;
        }
        let edges: AHashSet<(CallNode, CallNode)> = self.edges().into_iter().collect();
        let other_edges: AHashSet<(CallNode, CallNode)> = other.edges().into_iter().collect();
        edges == other_edges
    }
}

#[derive(Serialize)]
struct GraphSer<'a> {
    nodes: Vec<&'a CallNode>,
    edges: Vec<(u32, u32)>,
}

#[derive(Deserialize)]
struct GraphDe {
    nodes: Vec<CallNode>,
    edges: Vec<(u32, u32)>,
}

impl Serialize for CallGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let nodes: Vec<&CallNode> = self.graph.node_weights().collect();
        let edges = self
            .graph
            .edge_references()
            .map(|edge| (edge.source().index() as u32, edge.target().index() as u32))
            .collect();
        GraphSer { nodes, edges }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallGraph {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = GraphDe::deserialize(deserializer)?;
        let mut graph = Self::new();
        for node in &repr.nodes {
            graph.add_node(node.clone());
        }
        for (from, to) in repr.edges {
            let from = repr
                .nodes
                .get(from as usize)
                .ok_or_else(|| serde::de::Error::custom("edge endpoint out of range"))?;
            let to = repr
                .nodes
                .get(to as usize)
                .ok_or_else(|| serde::de::Error::custom("edge endpoint out of range"))?;
            graph.add_edge(from, to);
        }
        Ok(graph)
    }
}
