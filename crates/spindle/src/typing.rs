//! Three-valued type lattice over the constants block.
//!
//! The deducer classifies every constants-block expression as an ordinary
//! value (`Any`), the symbolic result of a workflow-function call
//! (`Symbolic`), a structural tuple of classified elements, or a `Terminal`
//! container that cannot be decomposed further. The lattice exists purely to
//! reject illegal uses of deferred results at decomposition time; it never
//! reaches runtime.
//!
//! The single pass also enforces the call rules that need scope context:
//! a deferred value passed to a non-workflow call is a copy violation, a call
//! of an entirely unknown name has no definition, and a plain read of an
//! unbound name is a context error.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use crate::{
    builtins::Builtin,
    error::{Error, Result},
    expressions::{Comprehension, Expr, Stmt, UnpackTarget},
    graph::PathStep,
    value::Value,
};

/// The container kinds that terminate structural decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TerminalKind {
    Dict,
    Set,
    Union,
    Iterator,
}

/// A lattice value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Deduced {
    /// Ordinary runtime value.
    Any,
    /// The symbolic result of a workflow-function call.
    Symbolic,
    /// Tuple or list display with known arity and element types.
    Tuple(Vec<Deduced>),
    /// A container of values that cannot be structurally decomposed. The flag
    /// records whether a symbolic value may be hiding inside.
    Terminal { kind: TerminalKind, symbolic: bool },
}

impl Deduced {
    /// True when a deferred result may occur anywhere inside a value of this
    /// type.
    pub(crate) fn contains_symbolic(&self) -> bool {
        match self {
            Self::Any => false,
            Self::Symbolic => true,
            Self::Tuple(items) => items.iter().any(Self::contains_symbolic),
            Self::Terminal { symbolic, .. } => *symbolic,
        }
    }
}

/// Single-pass visitor threading the `name → lattice value` map over the
/// sorted constants block.
pub(crate) struct TypeDeducer<'a> {
    known: &'a IndexSet<String>,
    /// Parameter and captured-global names, all of type `Any`.
    outer: &'a IndexSet<String>,
    types: IndexMap<String, Deduced>,
}

impl<'a> TypeDeducer<'a> {
    pub(crate) fn new(known: &'a IndexSet<String>, outer: &'a IndexSet<String>) -> Self {
        Self {
            known,
            outer,
            types: IndexMap::new(),
        }
    }

    /// The `name → lattice value` map accumulated so far.
    pub(crate) fn types(&self) -> &IndexMap<String, Deduced> {
        &self.types
    }

    /// Checks one constants-block statement and records the bindings it makes.
    pub(crate) fn visit_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Assign { target, value } => {
                let value_type = self.visit(value, &AHashMap::new())?;
                self.bind_target(target, &value_type)
            }
            Stmt::Expr(expr) => {
                self.visit(expr, &AHashMap::new())?;
                Ok(())
            }
            Stmt::Pass => Ok(()),
            _ => Err(Error::Syntax(
                "only assignments and bare expressions are allowed in the constants block".to_owned(),
            )),
        }
    }

    /// The lattice value of an expression under the current bindings.
    pub(crate) fn visit(&self, expr: &Expr, locals: &AHashMap<String, Deduced>) -> Result<Deduced> {
        Ok(match expr {
            Expr::Literal(_) => Deduced::Any,
            Expr::Name(name) => self.lookup(name, locals)?,
            Expr::Tuple(items) | Expr::List(items) => Deduced::Tuple(
                items
                    .iter()
                    .map(|item| self.visit(item, locals))
                    .collect::<Result<_>>()?,
            ),
            Expr::Dict(entries) => {
                let mut symbolic = false;
                for (key, value) in entries {
                    symbolic |= self.visit(key, locals)?.contains_symbolic();
                    symbolic |= self.visit(value, locals)?.contains_symbolic();
                }
                Deduced::Terminal {
                    kind: TerminalKind::Dict,
                    symbolic,
                }
            }
            Expr::Set(items) => {
                let mut symbolic = false;
                for item in items {
                    symbolic |= self.visit(item, locals)?.contains_symbolic();
                }
                Deduced::Terminal {
                    kind: TerminalKind::Set,
                    symbolic,
                }
            }
            Expr::Op { left, op, right } => {
                let left = self.visit(left, locals)?;
                let right = self.visit(right, locals)?;
                if left.contains_symbolic() || right.contains_symbolic() {
                    return Err(Error::Syntax(format!(
                        "cannot use deferred results as values (operator `{}`)",
                        op.symbol()
                    )));
                }
                Deduced::Any
            }
            Expr::Bool { values, .. } => {
                for value in values {
                    if self.visit(value, locals)?.contains_symbolic() {
                        return Err(Error::Syntax(
                            "cannot use deferred results as values (boolean operator)".to_owned(),
                        ));
                    }
                }
                Deduced::Any
            }
            Expr::Unary { operand, .. } => {
                if self.visit(operand, locals)?.contains_symbolic() {
                    return Err(Error::Syntax(
                        "cannot use deferred results as values (unary operator)".to_owned(),
                    ));
                }
                Deduced::Any
            }
            Expr::Compare { .. } => {
                return Err(Error::Syntax(
                    "comparisons are not allowed in the constants block".to_owned(),
                ));
            }
            Expr::IfElse { test, body, orelse } => {
                if self.visit(test, locals)?.contains_symbolic() {
                    return Err(Error::Syntax(
                        "a deferred result cannot decide a conditional expression".to_owned(),
                    ));
                }
                let body = self.visit(body, locals)?;
                let orelse = self.visit(orelse, locals)?;
                if body == orelse {
                    body
                } else {
                    let symbolic = body.contains_symbolic() || orelse.contains_symbolic();
                    Deduced::Terminal {
                        kind: TerminalKind::Union,
                        symbolic,
                    }
                }
            }
            Expr::Call { function, args, kwargs } => self.visit_call(function, args, kwargs, locals)?,
            Expr::Subscript { object, index } => {
                let object = self.visit(object, locals)?;
                self.visit(index, locals)?;
                match object {
                    Deduced::Symbolic => Deduced::Symbolic,
                    Deduced::Tuple(items) => match constant_index(index) {
                        Some(i) => project_index(&items, i)
                            .ok_or_else(|| Error::Syntax("tuple index out of range in constants block".to_owned()))?,
                        None => Deduced::Any,
                    },
                    Deduced::Terminal { .. } => {
                        return Err(Error::Syntax("cannot decompose a terminal value".to_owned()));
                    }
                    Deduced::Any => Deduced::Any,
                }
            }
            Expr::Slice { object, lower, upper } => {
                let object = self.visit(object, locals)?;
                for bound in [lower, upper].into_iter().flatten() {
                    self.visit(bound, locals)?;
                }
                match object {
                    Deduced::Symbolic => Deduced::Symbolic,
                    Deduced::Tuple(items) => {
                        let bounds = (constant_bound(lower.as_deref()), constant_bound(upper.as_deref()));
                        match bounds {
                            (Some(lower), Some(upper)) => {
                                let (start, end) = slice_range(items.len(), lower, upper);
                                Deduced::Tuple(items[start..end].to_vec())
                            }
                            _ => Deduced::Any,
                        }
                    }
                    Deduced::Terminal { .. } => {
                        return Err(Error::Syntax("cannot decompose a terminal value".to_owned()));
                    }
                    Deduced::Any => Deduced::Any,
                }
            }
            Expr::ListComp { elt, generators } => self.visit_comprehension(elt, generators, locals)?,
            Expr::SetComp { elt, generators } => {
                let elt = self.visit_comprehension(elt, generators, locals)?;
                Deduced::Terminal {
                    kind: TerminalKind::Set,
                    symbolic: elt.contains_symbolic(),
                }
            }
            Expr::DictComp { key, value, generators } => {
                let scope = self.comprehension_scope(generators, locals)?;
                let symbolic = self.visit(key, &scope)?.contains_symbolic()
                    || self.visit(value, &scope)?.contains_symbolic();
                Deduced::Terminal {
                    kind: TerminalKind::Dict,
                    symbolic,
                }
            }
            Expr::Generator { elt, generators } => {
                let elt = self.visit_comprehension(elt, generators, locals)?;
                Deduced::Terminal {
                    kind: TerminalKind::Iterator,
                    symbolic: elt.contains_symbolic(),
                }
            }
        })
    }

    fn lookup(&self, name: &str, locals: &AHashMap<String, Deduced>) -> Result<Deduced> {
        if let Some(deduced) = locals.get(name).or_else(|| self.types.get(name)) {
            return Ok(deduced.clone());
        }
        if self.outer.contains(name) || self.known.contains(name) || Builtin::lookup(name).is_some() {
            return Ok(Deduced::Any);
        }
        Err(Error::Context(name.to_owned()))
    }

    fn visit_call(
        &self,
        function: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        locals: &AHashMap<String, Deduced>,
    ) -> Result<Deduced> {
        let arg_exprs = args.iter().chain(kwargs.iter().map(|(_, expr)| expr));
        if self.known.contains(function) {
            for arg in arg_exprs {
                self.visit(arg, locals)?;
            }
            return Ok(Deduced::Symbolic);
        }

        let ordinary = Builtin::lookup(function).is_some() || self.outer.contains(function);
        if !ordinary && !locals.contains_key(function) && !self.types.contains_key(function) {
            return Err(Error::MissingFunction(function.to_owned()));
        }
        for arg in arg_exprs {
            if self.visit(arg, locals)?.contains_symbolic() {
                return Err(Error::Copy(format!(
                    "deferred result passed to ordinary function `{function}`; results must be loaded before ordinary code can use them"
                )));
            }
        }
        Ok(Deduced::Any)
    }

    fn visit_comprehension(
        &self,
        elt: &Expr,
        generators: &[Comprehension],
        locals: &AHashMap<String, Deduced>,
    ) -> Result<Deduced> {
        let scope = self.comprehension_scope(generators, locals)?;
        self.visit(elt, &scope)
    }

    /// Registers generator targets as comprehension-local bindings.
    fn comprehension_scope(
        &self,
        generators: &[Comprehension],
        locals: &AHashMap<String, Deduced>,
    ) -> Result<AHashMap<String, Deduced>> {
        let mut scope = locals.clone();
        for comp in generators {
            let iter_type = self.visit(&comp.iter, &scope)?;
            if matches!(iter_type, Deduced::Terminal { .. }) {
                return Err(Error::Syntax("cannot iterate a terminal value".to_owned()));
            }
            for leaf in comp.target.leaf_names() {
                if self.known.contains(leaf) {
                    return Err(Error::Syntax(format!("cannot reassign workflow function `{leaf}`")));
                }
            }
            bind_into(&comp.target, &iter_type, &mut |name, deduced| {
                scope.insert(name.to_owned(), deduced);
            })?;
            for cond in &comp.ifs {
                if self.visit(cond, &scope)?.contains_symbolic() {
                    return Err(Error::Syntax(
                        "a deferred result cannot decide a comprehension filter".to_owned(),
                    ));
                }
            }
        }
        Ok(scope)
    }

    fn bind_target(&mut self, target: &UnpackTarget, value_type: &Deduced) -> Result<()> {
        let mut error = None;
        bind_into(target, value_type, &mut |name, deduced| {
            if self.types.contains_key(name) {
                error.get_or_insert_with(|| {
                    Error::Syntax(format!("cannot reassign `{name}` in the constants block"))
                });
                return;
            }
            self.types.insert(name.to_owned(), deduced);
        })?;
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Projects a value type onto every leaf of an unpacking target. Structural
/// tuples project elementwise; any other type replicates to each leaf.
fn bind_into(target: &UnpackTarget, value_type: &Deduced, bind: &mut impl FnMut(&str, Deduced)) -> Result<()> {
    for (name, path) in target.leaf_paths() {
        let mut current = value_type.clone();
        for step in &path {
            if matches!(current, Deduced::Terminal { .. }) {
                return Err(Error::Syntax("cannot unpack a terminal value".to_owned()));
            }
            let Deduced::Tuple(items) = current else {
                // Symbolic and Any replicate to every leaf.
                break;
            };
            current = match step {
                PathStep::Index(Value::Int(i)) => project_index(&items, *i)
                    .ok_or_else(|| Error::Syntax("not enough values to unpack in constants block".to_owned()))?,
                PathStep::Spread { skip, skip_back } => {
                    if items.len() < skip + skip_back {
                        return Err(Error::Syntax("not enough values to unpack in constants block".to_owned()));
                    }
                    Deduced::Tuple(items[*skip..items.len() - skip_back].to_vec())
                }
                _ => Deduced::Any,
            };
        }
        bind(&name, current);
    }
    Ok(())
}

fn project_index(items: &[Deduced], index: i64) -> Option<Deduced> {
    let len = items.len() as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Some(items[index as usize].clone())
    } else {
        None
    }
}

fn constant_index(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Literal(crate::expressions::Literal::Int(i)) => Some(*i),
        Expr::Unary {
            op: crate::expressions::UnaryOperator::Minus,
            operand,
        } => match operand.as_ref() {
            Expr::Literal(crate::expressions::Literal::Int(i)) => Some(-i),
            _ => None,
        },
        _ => None,
    }
}

/// `Some(Some(i))` for a constant bound, `Some(None)` for an absent bound,
/// `None` when the bound is not a compile-time constant.
fn constant_bound(expr: Option<&Expr>) -> Option<Option<i64>> {
    match expr {
        None => Some(None),
        Some(expr) => constant_index(expr).map(Some),
    }
}

fn slice_range(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |bound: i64| -> i64 {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(0, len)
    };
    let start = clamp(lower.unwrap_or(0));
    let end = clamp(upper.unwrap_or(len));
    (start as usize, start.max(end) as usize)
}
