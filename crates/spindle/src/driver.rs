//! Drivers: executors that walk a blueprint's DAG against a store.
//!
//! Both drivers share one contract: execute every call node reachable from
//! the entry in an order consistent with the graph, at most once per
//! `(call node, image hash)`, then return the entry's result. Nodes whose key
//! is already completed in the store are skipped, which is what makes reruns
//! and cross-version sharing cheap.
//!
//! Cancellation is observed between call dispatches only; an in-flight call
//! always runs to completion.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::unbounded;
use tracing::{debug_span, trace};

use crate::{
    blueprint::Blueprint,
    error::{Error, Result},
    resource::{Limits, Tracker},
    store::{Store, StoreAccessor},
    value::Value,
};

/// A workflow executor.
pub trait Driver {
    fn execute(&self, blueprint: &Blueprint, store: &dyn Store) -> Result<Value>;
}

/// Cooperative cancellation signal shared between a controller and a driver.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

fn cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(CancelToken::is_cancelled)
}

/// Executes one node: skip if completed, otherwise compute and store.
fn run_node(blueprint: &Blueprint, index: usize, accessor: StoreAccessor<'_>, tracker: &mut Tracker) -> Result<()> {
    let node = blueprint.graph.node_at(index);
    let image = blueprint
        .images
        .get(&node.function)
        .ok_or_else(|| Error::MissingFunction(node.function.clone()))?;
    if accessor.completed(node, image.hash())? {
        trace!(%node, "already completed");
        return Ok(());
    }
    let _span = debug_span!("call", %node).entered();
    let value = image.compute(node, accessor, tracker)?;
    accessor.store(node, image.hash(), value)
}

fn entry_result(blueprint: &Blueprint, accessor: StoreAccessor<'_>) -> Result<Value> {
    let image = blueprint
        .images
        .get(&blueprint.entry.function)
        .ok_or_else(|| Error::MissingFunction(blueprint.entry.function.clone()))?;
    accessor.load(&blueprint.entry, image.hash())
}

/// Single-worker driver: a ready queue seeded with the source nodes, drained
/// in topological order.
#[derive(Debug, Default)]
pub struct Sequential {
    limits: Limits,
    cancel: Option<CancelToken>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Driver for Sequential {
    fn execute(&self, blueprint: &Blueprint, store: &dyn Store) -> Result<Value> {
        let accessor = StoreAccessor::new(store);
        let mut tracker = Tracker::new(self.limits);

        let mut in_degree = blueprint.graph.in_degrees();
        let mut ready: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| i)
            .collect();

        let mut executed = 0usize;
        while let Some(index) = ready.pop_front() {
            if cancelled(self.cancel.as_ref()) {
                return Err(Error::Cancelled);
            }
            run_node(blueprint, index, accessor, &mut tracker)?;
            executed += 1;
            for successor in blueprint.graph.successor_indices(index) {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    ready.push_back(successor);
                }
            }
        }
        if executed != blueprint.graph.len() {
            return Err(Error::NotDag("call graph has unreachable nodes".to_owned()));
        }
        entry_result(blueprint, accessor)
    }
}

/// Fixed worker pool over a shared ready queue.
///
/// A completion notifier updates predecessor counts and enqueues newly ready
/// nodes. The first failure stops scheduling, in-flight nodes drain, and the
/// error surfaces.
#[derive(Debug)]
pub struct Queued {
    workers: usize,
    limits: Limits,
    cancel: Option<CancelToken>,
}

impl Queued {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            limits: Limits::default(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Driver for Queued {
    fn execute(&self, blueprint: &Blueprint, store: &dyn Store) -> Result<Value> {
        let accessor = StoreAccessor::new(store);
        let mut in_degree = blueprint.graph.in_degrees();
        let total = in_degree.len();

        // The work sender lives inside the scope: dropping it on the way out
        // (success or error) is what lets the workers finish and join.
        thread::scope(|scope| -> Result<()> {
            let (work_tx, work_rx) = unbounded::<usize>();
            let (done_tx, done_rx) = unbounded::<(usize, Result<()>)>();
            for _ in 0..self.workers {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                let limits = self.limits;
                scope.spawn(move || {
                    let mut tracker = Tracker::new(limits);
                    while let Ok(index) = work_rx.recv() {
                        let result = run_node(blueprint, index, accessor, &mut tracker);
                        if done_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut in_flight = 0usize;
            let mut completed = 0usize;
            let mut failure: Option<Error> = None;
            let mut stopped = false;

            for (index, degree) in in_degree.iter().enumerate() {
                if *degree == 0 {
                    let _ = work_tx.send(index);
                    in_flight += 1;
                }
            }

            while in_flight > 0 {
                let (index, result) = done_rx
                    .recv()
                    .map_err(|_| Error::Invalid("worker pool disconnected".to_owned()))?;
                in_flight -= 1;
                match result {
                    Ok(()) => {
                        completed += 1;
                        if cancelled(self.cancel.as_ref()) {
                            stopped = true;
                        }
                        if failure.is_none() && !stopped {
                            for successor in blueprint.graph.successor_indices(index) {
                                in_degree[successor] -= 1;
                                if in_degree[successor] == 0 {
                                    let _ = work_tx.send(successor);
                                    in_flight += 1;
                                }
                            }
                        }
                    }
                    Err(error) => {
                        failure.get_or_insert(error);
                        stopped = true;
                    }
                }
            }

            if let Some(failure) = failure {
                Err(failure)
            } else if completed != total {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        })?;

        entry_result(blueprint, accessor)
    }
}
