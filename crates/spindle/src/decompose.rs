//! The decomposition pipeline: ordered passes that strip the constants block
//! out of a function body, check it, and sort it into dependency order.
//!
//! Pass order is fixed; later passes rely on invariants established earlier:
//!
//! 1. locate the single `with ...:` constants block and strip it;
//! 2. reject mutation inside the block;
//! 3. reject binding a name that names a workflow function;
//! 4. sort the block topologically by its statement dependency graph
//!    (original order breaks ties, a cycle is `NotDag`);
//! 5. run the type deducer over the sorted block, which also enforces the
//!    copy-only rule and flags unbound names;
//! 6. record which workflow functions the block references.
//!
//! Mutating assignment targets and multi-target assignments never reach this
//! module; lowering already rejected them.

use std::collections::BTreeSet;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    expressions::{FunctionDef, Stmt, stmt_binds, stmt_reads},
    typing::TypeDeducer,
};

/// The output of decomposition: the sorted constants block, the remaining
/// body, and the workflow functions the block references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub(crate) constants: Vec<Stmt>,
    pub(crate) body: Vec<Stmt>,
    pub(crate) dependencies: IndexSet<String>,
}

/// Runs the pipeline over a lowered definition.
///
/// `known` is the set of workflow-function names visible to this definition;
/// `outer` holds parameter and captured-global names.
pub(crate) fn decompose(def: &FunctionDef, known: &IndexSet<String>, outer: &IndexSet<String>) -> Result<Decomposition> {
    let (block, body) = extract_block(&def.body)?;

    for stmt in &block {
        match stmt {
            Stmt::AugAssign { .. } => {
                return Err(Error::Invalid(
                    "cannot mutate a binding inside the constants block".to_owned(),
                ));
            }
            Stmt::Assign { target, .. } => {
                for leaf in target.leaf_names() {
                    if known.contains(leaf) {
                        return Err(Error::Syntax(format!("cannot reassign workflow function `{leaf}`")));
                    }
                }
            }
            // Anything else is rejected by the deducer below.
            _ => {}
        }
    }

    let constants = sort_block(block)?;

    let mut deducer = TypeDeducer::new(known, outer);
    for stmt in &constants {
        deducer.visit_stmt(stmt)?;
    }

    let mut dependencies = IndexSet::new();
    for stmt in &constants {
        for read in stmt_reads(stmt) {
            if known.contains(&read) {
                dependencies.insert(read);
            }
        }
    }

    Ok(Decomposition {
        constants,
        body,
        dependencies,
    })
}

/// Pass 1: strip the constants block out of the body, wherever it appears.
fn extract_block(body: &[Stmt]) -> Result<(Vec<Stmt>, Vec<Stmt>)> {
    let mut block = None;
    let mut rest = Vec::with_capacity(body.len());
    for stmt in body {
        if let Stmt::Constants(stmts) = stmt {
            if block.replace(stmts.clone()).is_some() {
                return Err(Error::Invalid(
                    "a workflow function requires exactly one constants block".to_owned(),
                ));
            }
        } else {
            rest.push(stmt.clone());
        }
    }
    Ok((block.unwrap_or_default(), rest))
}

/// Pass 4: reorder the block into the topological order of its statement
/// dependency graph, breaking ties by original source order.
fn sort_block(block: Vec<Stmt>) -> Result<Vec<Stmt>> {
    let mut defined_by: AHashMap<String, usize> = AHashMap::new();
    for (i, stmt) in block.iter().enumerate() {
        for name in stmt_binds(stmt) {
            if defined_by.insert(name.clone(), i).is_some() {
                return Err(Error::Syntax(format!("cannot reassign `{name}` in the constants block")));
            }
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); block.len()];
    let mut in_degree = vec![0usize; block.len()];
    let mut seen_edges = AHashSet::new();
    for (user, stmt) in block.iter().enumerate() {
        for read in stmt_reads(stmt) {
            if let Some(&definer) = defined_by.get(read.as_str()) {
                if seen_edges.insert((definer, user)) {
                    successors[definer].push(user);
                    in_degree[user] += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(block.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for &user in &successors[next] {
            in_degree[user] -= 1;
            if in_degree[user] == 0 {
                ready.insert(user);
            }
        }
    }
    if order.len() != block.len() {
        return Err(Error::NotDag("constants-block statements form a cycle".to_owned()));
    }

    let mut slots: Vec<Option<Stmt>> = block.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| slots[i].take().expect("each statement is emitted once"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_function;

    fn run(source: &str, known: &[&str]) -> Result<Decomposition> {
        let def = parse_function(source).unwrap();
        let known: IndexSet<String> = known.iter().map(|s| (*s).to_owned()).collect();
        let outer: IndexSet<String> = def.params.iter().map(|p| p.name.clone()).collect();
        decompose(&def, &known, &outer)
    }

    #[test]
    fn statements_sort_into_dependency_order() {
        let decomposition = run(
            "def f():\n    return a + b\n    with ...:\n        a = g()\n        b = indirect\n        indirect = h()\n",
            &["g", "h"],
        )
        .unwrap();

        let bound: Vec<_> = decomposition.constants.iter().flat_map(stmt_binds).collect();
        assert_eq!(bound, ["a", "indirect", "b"]);
        let deps: Vec<_> = decomposition.dependencies.iter().map(String::as_str).collect();
        assert_eq!(deps, ["g", "h"]);
    }

    #[test]
    fn two_blocks_are_invalid() {
        let err = run(
            "def f():\n    with ...:\n        pass\n    with ...:\n        pass\n",
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn cyclic_statements_are_not_a_dag() {
        let err = run(
            "def f():\n    with ...:\n        a = g(b)\n        b = g(a)\n",
            &["g"],
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotDag(_)));
    }

    #[test]
    fn mutation_in_the_block_is_invalid() {
        let err = run("def f():\n    with ...:\n        a = 1\n        a += 1\n", &[]).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn missing_block_is_allowed() {
        let decomposition = run("def f():\n    return 1\n", &[]).unwrap();
        assert!(decomposition.constants.is_empty());
        assert_eq!(decomposition.body.len(), 1);
    }
}
