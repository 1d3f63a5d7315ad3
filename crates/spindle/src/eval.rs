//! Tree-walking evaluator for the IR.
//!
//! The same evaluator serves two modes that differ only in what a call to a
//! workflow function means:
//!
//! * **Build** — the call constructs a [`CallNode`], registers it (plus the
//!   edges from any deferred arguments) in a graph, and evaluates to a
//!   deferred reference. This is how the constants block turns into a call
//!   graph, and also how a body invocation reconstructs the exact nodes the
//!   graph was built from before loading their results.
//! * **Pure** — workflow calls are an error; used for default-value evaluation
//!   and for the body statements, where dependency names are not in scope.
//!
//! Everything else — operators, unpacking, comprehensions, builtins — behaves
//! identically in both modes.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    builtins::Builtin,
    error::{Error, Result, RunError, RunErrorKind},
    expressions::{Comprehension, Expr, Literal, Stmt, UnpackTarget},
    function::Signature,
    graph::{CallGraph, CallNode, Deferred, PathStep},
    resource::Tracker,
    value::{self, Value},
};

pub(crate) enum Mode<'g> {
    Build { graph: &'g mut CallGraph },
    Pure,
}

/// Statement-level control flow signal.
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(crate) struct Evaluator<'a, 'g> {
    mode: Mode<'g>,
    /// Signatures of the workflow functions in scope, for keyword
    /// normalization.
    sigs: IndexMap<&'a str, &'a Signature>,
    globals: &'a IndexMap<String, Value>,
    env: AHashMap<String, Value>,
    tracker: &'a mut Tracker,
}

impl<'a, 'g> Evaluator<'a, 'g> {
    pub(crate) fn new(
        mode: Mode<'g>,
        sigs: IndexMap<&'a str, &'a Signature>,
        globals: &'a IndexMap<String, Value>,
        tracker: &'a mut Tracker,
    ) -> Self {
        Self {
            mode,
            sigs,
            globals,
            env: AHashMap::new(),
            tracker,
        }
    }

    pub(crate) fn bind(&mut self, name: &str, value: Value) {
        self.env.insert(name.to_owned(), value);
    }

    pub(crate) fn set_env(&mut self, env: AHashMap<String, Value>) {
        self.env = env;
    }

    pub(crate) fn into_env(self) -> AHashMap<String, Value> {
        self.env
    }

    /// Executes the sorted constants block.
    pub(crate) fn run_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.tracker.tick()?;
            match stmt {
                Stmt::Assign { target, value } => {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
                Stmt::Expr(expr) => {
                    self.eval(expr)?;
                }
                Stmt::Pass => {}
                _ => {
                    return Err(Error::Invalid(
                        "statement not allowed in the constants block".to_owned(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Executes the body statements and produces the return value.
    ///
    /// A body that is a single bare expression yields that expression's
    /// value; otherwise the value of the first `return`, or `None`.
    pub(crate) fn run_body(&mut self, stmts: &[Stmt]) -> Result<Value> {
        if let [Stmt::Expr(expr)] = stmts {
            return self.eval(expr);
        }
        match self.exec_block(stmts)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.tracker.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Normal)
            }
            Stmt::AugAssign { name, op, value } => {
                let current = self.load_name(name)?;
                let value = self.eval(value)?;
                let result = value::binary_op(*op, &current, &value)?;
                self.env.insert(name.clone(), result);
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Pass => Ok(Flow::Normal),
            Stmt::If { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                }
            }
            Stmt::While { test, body, orelse } => {
                let mut broke = false;
                while self.eval(test)?.truthy()? {
                    self.tracker.tick()?;
                    match self.exec_block(body)? {
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                if broke { Ok(Flow::Normal) } else { self.exec_block(orelse) }
            }
            Stmt::For { target, iter, body, orelse } => {
                let items = self.eval(iter)?.elements()?;
                let mut broke = false;
                for item in items {
                    self.tracker.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                if broke { Ok(Flow::Normal) } else { self.exec_block(orelse) }
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Constants(_) => Err(Error::Invalid("constants block in function body".to_owned())),
        }
    }

    fn load_name(&self, name: &str) -> Result<Value> {
        self.env
            .get(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| RunError::name_error(name).into())
    }

    /// Binds an assignment target.
    ///
    /// Unpacking a deferred value cannot inspect the (not yet computed)
    /// result, so every leaf is bound to a path-projected deferred reference
    /// instead; the projection is applied when the result is loaded.
    fn assign(&mut self, target: &UnpackTarget, value: Value) -> Result<()> {
        match target {
            UnpackTarget::Name(name) | UnpackTarget::Starred(name) => {
                self.env.insert(name.clone(), value);
                Ok(())
            }
            UnpackTarget::Tuple(children) => {
                if let Value::Deferred(deferred) = &value {
                    for (name, path) in target.leaf_paths() {
                        let mut full = deferred.path.clone();
                        full.extend(path);
                        self.env.insert(
                            name,
                            Deferred {
                                node: deferred.node.clone(),
                                path: full,
                            }
                            .into(),
                        );
                    }
                    return Ok(());
                }
                self.unpack(children, value)
            }
        }
    }

    fn unpack(&mut self, children: &[UnpackTarget], value: Value) -> Result<()> {
        let items = value.elements()?;
        let star = children.iter().position(|c| matches!(c, UnpackTarget::Starred(_)));
        match star {
            None => {
                if items.len() != children.len() {
                    return Err(unpack_arity_error(children.len(), items.len(), false).into());
                }
                for (child, item) in children.iter().zip(items) {
                    self.assign(child, item)?;
                }
            }
            Some(star) => {
                let fixed = children.len() - 1;
                if items.len() < fixed {
                    return Err(unpack_arity_error(fixed, items.len(), true).into());
                }
                let tail_start = items.len() - (fixed - star);
                for (child, item) in children[..star].iter().zip(&items[..star]) {
                    self.assign(child, item.clone())?;
                }
                self.assign(&children[star], Value::List(items[star..tail_start].to_vec()))?;
                for (child, item) in children[star + 1..].iter().zip(&items[tail_start..]) {
                    self.assign(child, item.clone())?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.tracker.enter()?;
        let result = self.eval_inner(expr);
        self.tracker.leave();
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Name(name) => self.load_name(name),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Set(items) => Ok(Value::set(self.eval_all(items)?)?),
            Expr::Dict(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    pairs.push((self.eval(key)?, self.eval(value)?));
                }
                Ok(Value::dict(pairs)?)
            }
            Expr::Op { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(value::binary_op(*op, &left, &right)?)
            }
            Expr::Bool { op, values } => {
                let mut result = Value::None;
                for (i, value) in values.iter().enumerate() {
                    result = self.eval(value)?;
                    if i + 1 < values.len() && value::bool_op_decides(*op, &result)? {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                Ok(value::unary_op(*op, &operand)?)
            }
            Expr::Compare { left, ops, comparators } => {
                let mut current = self.eval(left)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let right = self.eval(comparator)?;
                    if !value::compare_op(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { function, args, kwargs } => self.eval_call(function, args, kwargs),
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                if let Value::Deferred(deferred) = object {
                    if !index.is_ground() {
                        return Err(RunError::type_error("subscript index cannot be deferred").into());
                    }
                    return Ok(deferred.project(PathStep::Index(index)).into());
                }
                Ok(object.index(&index)?)
            }
            Expr::Slice { object, lower, upper } => {
                let object = self.eval(object)?;
                let lower = self.eval_slice_bound(lower.as_deref())?;
                let upper = self.eval_slice_bound(upper.as_deref())?;
                if let Value::Deferred(deferred) = object {
                    return Ok(deferred.project(PathStep::Slice(lower, upper)).into());
                }
                Ok(object.slice(lower, upper)?)
            }
            Expr::ListComp { elt, generators } | Expr::Generator { elt, generators } => {
                let mut items = Vec::new();
                self.eval_comp(generators, &mut |ev| {
                    items.push(ev.eval(elt)?);
                    Ok(())
                })?;
                Ok(Value::List(items))
            }
            Expr::SetComp { elt, generators } => {
                let mut items = Vec::new();
                self.eval_comp(generators, &mut |ev| {
                    items.push(ev.eval(elt)?);
                    Ok(())
                })?;
                Ok(Value::set(items)?)
            }
            Expr::DictComp { key, value, generators } => {
                let mut pairs = Vec::new();
                self.eval_comp(generators, &mut |ev| {
                    let entry = (ev.eval(key)?, ev.eval(value)?);
                    pairs.push(entry);
                    Ok(())
                })?;
                Ok(Value::dict(pairs)?)
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval_slice_bound(&mut self, bound: Option<&Expr>) -> Result<Option<i64>> {
        match bound {
            None => Ok(None),
            Some(expr) => match self.eval(expr)? {
                Value::Int(i) => Ok(Some(i)),
                Value::Bool(b) => Ok(Some(i64::from(b))),
                other => Err(RunError::type_error(format!(
                    "slice indices must be integers, not '{}'",
                    other.type_name()
                ))
                .into()),
            },
        }
    }

    fn eval_call(&mut self, function: &str, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<Value> {
        let arg_values = self.eval_all(args)?;
        let mut kwarg_values = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            kwarg_values.push((name.clone(), self.eval(expr)?));
        }

        if let Some(signature) = self.sigs.get(function) {
            let (args, kwargs) = signature.normalize(arg_values, kwarg_values)?;
            let node = CallNode::with_kwargs(function, args, kwargs);
            return match &mut self.mode {
                Mode::Build { graph } => {
                    graph.add_node(node.clone());
                    let mut edges = Vec::new();
                    node.for_each_deferred(&mut |deferred| edges.push(deferred.node.clone()));
                    for dependency in edges {
                        graph.add_edge(&dependency, &node);
                    }
                    Ok(Deferred::new(node).into())
                }
                Mode::Pure => Err(Error::Invalid(format!(
                    "workflow function `{function}` cannot be called in this context"
                ))),
            };
        }

        if let Some(builtin) = Builtin::lookup(function) {
            if !kwarg_values.is_empty() {
                return Err(RunError::type_error(format!("{function}() takes no keyword arguments")).into());
            }
            return Ok(builtin.call(&arg_values)?);
        }

        match self.load_name(function) {
            Ok(value) => Err(RunError::type_error(format!("'{}' object is not callable", value.type_name())).into()),
            Err(_) => Err(RunError::name_error(function).into()),
        }
    }

    /// Runs the generator clauses, invoking `emit` once per produced element.
    /// Loop variables are restored afterwards so comprehensions do not leak.
    fn eval_comp(&mut self, generators: &[Comprehension], emit: &mut dyn FnMut(&mut Self) -> Result<()>) -> Result<()> {
        let mut saved = Vec::new();
        for comp in generators {
            for leaf in comp.target.leaf_names() {
                saved.push((leaf.to_owned(), self.env.get(leaf).cloned()));
            }
        }
        let result = self.comp_level(generators, emit);
        for (name, old) in saved {
            match old {
                Some(value) => self.env.insert(name, value),
                None => self.env.remove(&name),
            };
        }
        result
    }

    fn comp_level(&mut self, generators: &[Comprehension], emit: &mut dyn FnMut(&mut Self) -> Result<()>) -> Result<()> {
        let Some((comp, rest)) = generators.split_first() else {
            return emit(self);
        };
        let items = self.eval(&comp.iter)?.elements()?;
        'element: for item in items {
            self.tracker.tick()?;
            self.assign(&comp.target, item)?;
            for cond in &comp.ifs {
                if !self.eval(cond)?.truthy()? {
                    continue 'element;
                }
            }
            self.comp_level(rest, emit)?;
        }
        Ok(())
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn unpack_arity_error(expected: usize, got: usize, at_least: bool) -> RunError {
    let qualifier = if at_least { "at least " } else { "" };
    RunError::new(
        RunErrorKind::Unpack,
        format!("cannot unpack {got} value(s) into {qualifier}{expected} target(s)"),
    )
}
