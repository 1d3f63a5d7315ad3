//! Crate-owned intermediate representation of workflow function source.
//!
//! The raw parser AST is lowered into these types immediately after parsing
//! (see `parse.rs`); every later stage — decomposition, type deduction, graph
//! building, evaluation — works on this IR and never touches the parser AST.

use ahash::AHashSet;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::PathStep;

/// Binary operators of the supported subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// An expression in the supported subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    /// Binary operator application.
    Op {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    /// Short-circuit `and`/`or` over two or more operands.
    Bool {
        op: BoolOperator,
        values: Vec<Expr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    /// Chained comparison: `a < b <= c`.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOperator>,
        comparators: Vec<Expr>,
    },
    /// Conditional expression: `body if test else orelse`.
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// Call of a plain name; indirect callables are outside the subset.
    Call {
        function: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `object[lower:upper]`; a step is outside the subset.
    Slice {
        object: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// Generator expressions are evaluated eagerly, like a list comprehension;
    /// the distinction only matters to the type deducer.
    Generator {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
}

/// One `for target in iter [if cond]...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: UnpackTarget,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// An assignment target tree: identifiers, nested tuples/lists, and at most
/// one starred slot per level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnpackTarget {
    Name(String),
    Starred(String),
    Tuple(Vec<UnpackTarget>),
}

impl UnpackTarget {
    /// Leaf identifiers in left-to-right order.
    pub fn leaf_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'s>(&'s self, out: &mut Vec<&'s str>) {
        match self {
            Self::Name(name) | Self::Starred(name) => out.push(name),
            Self::Tuple(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// The projection path from the assigned value to every leaf, in
    /// left-to-right order. Fixed leaves after a starred slot index from the
    /// end, so the starred slot greedily absorbs the slack in between.
    pub fn leaf_paths(&self) -> Vec<(String, SmallVec<[PathStep; 2]>)> {
        let mut out = Vec::new();
        self.collect_paths(SmallVec::new(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: SmallVec<[PathStep; 2]>, out: &mut Vec<(String, SmallVec<[PathStep; 2]>)>) {
        match self {
            Self::Name(name) | Self::Starred(name) => out.push((name.clone(), prefix)),
            Self::Tuple(children) => {
                let star = children.iter().position(|c| matches!(c, Self::Starred(_)));
                for (i, child) in children.iter().enumerate() {
                    let step = match star {
                        Some(s) if i == s => PathStep::Spread {
                            skip: s,
                            skip_back: children.len() - s - 1,
                        },
                        Some(s) if i > s => PathStep::Index((i as i64 - children.len() as i64).into()),
                        _ => PathStep::Index((i as i64).into()),
                    };
                    let mut path = prefix.clone();
                    path.push(step);
                    child.collect_paths(path, out);
                }
            }
        }
    }
}

/// A statement in the supported subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr),
    /// Single-target assignment; the target may be a nested unpacking tree.
    Assign {
        target: UnpackTarget,
        value: Expr,
    },
    /// `name op= value`; only admitted outside the constants block.
    AugAssign {
        name: String,
        op: Operator,
        value: Expr,
    },
    Return(Option<Expr>),
    Pass,
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: UnpackTarget,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Break,
    Continue,
    /// The `with ...:` constants block, kept intact until decomposition
    /// strips it out of the body.
    Constants(Vec<Stmt>),
}

/// A declared parameter with an optional default expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A lowered workflow function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

impl FunctionDef {
    /// Names referenced by the function but bound nowhere inside it.
    ///
    /// Follows Python's function-scope rule: a name assigned anywhere in the
    /// body (including the constants block and loop targets) is local
    /// everywhere in the body.
    pub fn free_names(&self) -> IndexSet<String> {
        let mut bound: AHashSet<String> = self.params.iter().map(|p| p.name.clone()).collect();
        collect_bound(&self.body, &mut bound);

        let mut reads = IndexSet::new();
        // Defaults are evaluated in the enclosing scope, so their reads are
        // free regardless of local bindings.
        let empty = AHashSet::new();
        for param in &self.params {
            if let Some(default) = &param.default {
                collect_reads(default, &empty, &mut reads);
            }
        }
        for stmt in &self.body {
            collect_stmt_reads(stmt, &bound, &mut reads);
        }
        reads
    }
}

fn collect_bound(stmts: &[Stmt], bound: &mut AHashSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign { target, .. } => {
                for leaf in target.leaf_names() {
                    bound.insert(leaf.to_owned());
                }
            }
            Stmt::AugAssign { name, .. } => {
                bound.insert(name.clone());
            }
            Stmt::If { body, orelse, .. } | Stmt::While { body, orelse, .. } => {
                collect_bound(body, bound);
                collect_bound(orelse, bound);
            }
            Stmt::For { target, body, orelse, .. } => {
                for leaf in target.leaf_names() {
                    bound.insert(leaf.to_owned());
                }
                collect_bound(body, bound);
                collect_bound(orelse, bound);
            }
            Stmt::Constants(body) => collect_bound(body, bound),
            _ => {}
        }
    }
}

fn collect_stmt_reads(stmt: &Stmt, bound: &AHashSet<String>, out: &mut IndexSet<String>) {
    match stmt {
        Stmt::Expr(expr) | Stmt::Return(Some(expr)) => collect_reads(expr, bound, out),
        Stmt::Assign { value, .. } => collect_reads(value, bound, out),
        Stmt::AugAssign { name, value, .. } => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
            collect_reads(value, bound, out);
        }
        Stmt::If { test, body, orelse } | Stmt::While { test, body, orelse } => {
            collect_reads(test, bound, out);
            for inner in body.iter().chain(orelse) {
                collect_stmt_reads(inner, bound, out);
            }
        }
        Stmt::For { iter, body, orelse, .. } => {
            collect_reads(iter, bound, out);
            for inner in body.iter().chain(orelse) {
                collect_stmt_reads(inner, bound, out);
            }
        }
        Stmt::Constants(body) => {
            for inner in body {
                collect_stmt_reads(inner, bound, out);
            }
        }
        _ => {}
    }
}

/// Collects names read by an expression that are not in `bound`.
/// Comprehension targets shadow only within their own clauses.
pub(crate) fn collect_reads(expr: &Expr, bound: &AHashSet<String>, out: &mut IndexSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Name(name) => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        Expr::Tuple(items) | Expr::List(items) | Expr::Set(items) => {
            for item in items {
                collect_reads(item, bound, out);
            }
        }
        Expr::Dict(entries) => {
            for (key, value) in entries {
                collect_reads(key, bound, out);
                collect_reads(value, bound, out);
            }
        }
        Expr::Op { left, right, .. } => {
            collect_reads(left, bound, out);
            collect_reads(right, bound, out);
        }
        Expr::Bool { values, .. } => {
            for value in values {
                collect_reads(value, bound, out);
            }
        }
        Expr::Unary { operand, .. } => collect_reads(operand, bound, out),
        Expr::Compare { left, comparators, .. } => {
            collect_reads(left, bound, out);
            for comparator in comparators {
                collect_reads(comparator, bound, out);
            }
        }
        Expr::IfElse { test, body, orelse } => {
            collect_reads(test, bound, out);
            collect_reads(body, bound, out);
            collect_reads(orelse, bound, out);
        }
        Expr::Call { function, args, kwargs } => {
            if !bound.contains(function) {
                out.insert(function.clone());
            }
            for arg in args {
                collect_reads(arg, bound, out);
            }
            for (_, value) in kwargs {
                collect_reads(value, bound, out);
            }
        }
        Expr::Subscript { object, index } => {
            collect_reads(object, bound, out);
            collect_reads(index, bound, out);
        }
        Expr::Slice { object, lower, upper } => {
            collect_reads(object, bound, out);
            if let Some(lower) = lower {
                collect_reads(lower, bound, out);
            }
            if let Some(upper) = upper {
                collect_reads(upper, bound, out);
            }
        }
        Expr::ListComp { elt, generators }
        | Expr::SetComp { elt, generators }
        | Expr::Generator { elt, generators } => {
            collect_comp_reads(&[elt.as_ref()], generators, bound, out);
        }
        Expr::DictComp { key, value, generators } => {
            collect_comp_reads(&[key.as_ref(), value.as_ref()], generators, bound, out);
        }
    }
}

fn collect_comp_reads(elts: &[&Expr], generators: &[Comprehension], bound: &AHashSet<String>, out: &mut IndexSet<String>) {
    let mut scope = bound.clone();
    for (i, comp) in generators.iter().enumerate() {
        // The first iterable is evaluated in the enclosing scope.
        let iter_scope = if i == 0 { bound } else { &scope };
        collect_reads(&comp.iter, iter_scope, out);
        for leaf in comp.target.leaf_names() {
            scope.insert(leaf.to_owned());
        }
        for cond in &comp.ifs {
            collect_reads(cond, &scope, out);
        }
    }
    for elt in elts {
        collect_reads(elt, &scope, out);
    }
}

/// Names bound by a constants-block statement.
pub(crate) fn stmt_binds(stmt: &Stmt) -> Vec<String> {
    match stmt {
        Stmt::Assign { target, .. } => target.leaf_names().into_iter().map(str::to_owned).collect(),
        _ => Vec::new(),
    }
}

/// Names read by a constants-block statement.
pub(crate) fn stmt_reads(stmt: &Stmt) -> IndexSet<String> {
    let mut out = IndexSet::new();
    collect_stmt_reads(stmt, &AHashSet::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn tuple(children: Vec<UnpackTarget>) -> UnpackTarget {
        UnpackTarget::Tuple(children)
    }

    fn name(n: &str) -> UnpackTarget {
        UnpackTarget::Name(n.to_owned())
    }

    #[test]
    fn leaf_paths_for_nested_targets() {
        // (a, b), c
        let target = tuple(vec![tuple(vec![name("a"), name("b")]), name("c")]);
        let paths = target.leaf_paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].0, "a");
        assert_eq!(paths[0].1.as_slice(), &[PathStep::Index(Value::Int(0)), PathStep::Index(Value::Int(0))]);
        assert_eq!(paths[1].1.as_slice(), &[PathStep::Index(Value::Int(0)), PathStep::Index(Value::Int(1))]);
        assert_eq!(paths[2].1.as_slice(), &[PathStep::Index(Value::Int(1))]);
    }

    #[test]
    fn starred_leaves_absorb_slack() {
        // head, *body, foot
        let target = tuple(vec![name("head"), UnpackTarget::Starred("body".to_owned()), name("foot")]);
        let paths = target.leaf_paths();
        assert_eq!(paths[0].1.as_slice(), &[PathStep::Index(Value::Int(0))]);
        assert_eq!(paths[1].1.as_slice(), &[PathStep::Spread { skip: 1, skip_back: 1 }]);
        assert_eq!(paths[2].1.as_slice(), &[PathStep::Index(Value::Int(-1))]);
    }

    #[test]
    fn comprehension_targets_do_not_leak_into_reads() {
        // [i for i in xs]
        let comp = Expr::ListComp {
            elt: Box::new(Expr::Name("i".to_owned())),
            generators: vec![Comprehension {
                target: name("i"),
                iter: Expr::Name("xs".to_owned()),
                ifs: Vec::new(),
            }],
        };
        let mut out = IndexSet::new();
        collect_reads(&comp, &AHashSet::new(), &mut out);
        assert!(out.contains("xs"));
        assert!(!out.contains("i"));
    }
}
