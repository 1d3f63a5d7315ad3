//! Runtime value model shared by graph building, evaluation, and storage.
//!
//! Values are plain owned data: no interning, no arena, no reference counting.
//! Everything is structurally comparable, hashable, and serializable, which is
//! what lets call nodes act as store keys. The one non-ordinary variant is
//! [`Value::Deferred`], the symbolic result of a workflow-function call that
//! has not been executed yet; a value containing no deferred parts is called
//! *ground*.

use std::{
    cmp::Ordering,
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher as _},
};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{
    error::{RunError, RunErrorKind},
    expressions::{BoolOperator, CmpOperator, Operator, UnaryOperator},
    graph::Deferred,
    hash::Hasher,
};

/// A runtime value.
///
/// `PartialEq` is structural: `Int(1)` and `Float(1.0)` are *not* equal (use
/// [`Value::py_eq`] for Python comparison semantics), and dict/set equality is
/// order-insensitive to match the hand-written `Hash` implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
    /// Symbolic reference to the (possibly projected) result of a call node.
    Deferred(Box<Deferred>),
}

// NaN breaks strict reflexivity, but keys are checked for hashability before
// they enter a dict or set and workflow results are ordinary data; treating
// equality as total keeps call nodes usable as map keys.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::None => state.write_u8(0),
            Self::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Self::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Self::Float(f) => {
                state.write_u8(3);
                f.to_bits().hash(state);
            }
            Self::Str(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Self::Tuple(items) => {
                state.write_u8(5);
                items.hash(state);
            }
            Self::List(items) => {
                state.write_u8(6);
                items.hash(state);
            }
            // Dict and set equality ignore insertion order, so their hashes
            // must too: combine per-entry hashes with XOR.
            Self::Dict(map) => {
                state.write_u8(7);
                state.write_u64(unordered_hash(map.iter()));
            }
            Self::Set(set) => {
                state.write_u8(8);
                state.write_u64(unordered_hash(set.iter().map(|v| (v, &Self::None))));
            }
            Self::Deferred(deferred) => {
                state.write_u8(9);
                deferred.hash(state);
            }
        }
    }
}

fn unordered_hash<'a>(entries: impl Iterator<Item = (&'a Value, &'a Value)>) -> u64 {
    let mut acc = 0u64;
    for (key, value) in entries {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        value.hash(&mut hasher);
        acc ^= hasher.finish();
    }
    acc
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Deferred> for Value {
    fn from(v: Deferred) -> Self {
        Self::Deferred(Box::new(v))
    }
}

impl Value {
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items)
    }

    pub fn list(items: Vec<Self>) -> Self {
        Self::List(items)
    }

    pub fn dict(entries: Vec<(Self, Self)>) -> Result<Self, RunError> {
        let mut map = IndexMap::with_capacity(entries.len());
        for (key, value) in entries {
            key.check_hashable()?;
            map.insert(key, value);
        }
        Ok(Self::Dict(map))
    }

    pub fn set(items: Vec<Self>) -> Result<Self, RunError> {
        let mut set = IndexSet::with_capacity(items.len());
        for item in items {
            item.check_hashable()?;
            set.insert(item);
        }
        Ok(Self::Set(set))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Deferred(_) => "deferred",
        }
    }

    /// True when no [`Value::Deferred`] occurs anywhere inside this value.
    pub fn is_ground(&self) -> bool {
        let mut ground = true;
        self.for_each_deferred(&mut |_| ground = false);
        ground
    }

    /// Visits every deferred reference embedded in this value, depth-first.
    pub fn for_each_deferred<'s>(&'s self, visit: &mut impl FnMut(&'s Deferred)) {
        match self {
            Self::Deferred(deferred) => visit(deferred),
            Self::Tuple(items) | Self::List(items) => {
                for item in items {
                    item.for_each_deferred(visit);
                }
            }
            Self::Dict(map) => {
                for (key, value) in map {
                    key.for_each_deferred(visit);
                    value.for_each_deferred(visit);
                }
            }
            Self::Set(set) => {
                for item in set {
                    item.for_each_deferred(visit);
                }
            }
            _ => {}
        }
    }

    /// Rebuilds this value with every embedded deferred reference replaced by
    /// the resolver's result. Used to materialize call arguments and to bind
    /// stored results into a function body's environment.
    pub fn resolve_with<E>(&self, resolver: &mut impl FnMut(&Deferred) -> Result<Self, E>) -> Result<Self, E> {
        Ok(match self {
            Self::Deferred(deferred) => resolver(deferred)?,
            Self::Tuple(items) => Self::Tuple(
                items
                    .iter()
                    .map(|item| item.resolve_with(resolver))
                    .collect::<Result<_, E>>()?,
            ),
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|item| item.resolve_with(resolver))
                    .collect::<Result<_, E>>()?,
            ),
            Self::Dict(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.resolve_with(resolver)?, value.resolve_with(resolver)?);
                }
                Self::Dict(out)
            }
            Self::Set(set) => {
                let mut out = IndexSet::with_capacity(set.len());
                for item in set {
                    out.insert(item.resolve_with(resolver)?);
                }
                Self::Set(out)
            }
            other => other.clone(),
        })
    }

    /// Feeds a canonical encoding of this value into a digest. Dict and set
    /// entries are fed in sorted per-entry-digest order so that equal values
    /// always produce equal digests regardless of insertion order.
    pub(crate) fn feed(&self, hasher: &mut Hasher) {
        match self {
            Self::None => hasher.tag(0),
            Self::Bool(b) => {
                hasher.tag(1);
                hasher.update_u64(u64::from(*b));
            }
            Self::Int(i) => {
                hasher.tag(2);
                hasher.update_u64(*i as u64);
            }
            Self::Float(f) => {
                hasher.tag(3);
                hasher.update_u64(f.to_bits());
            }
            Self::Str(s) => {
                hasher.tag(4);
                hasher.update_str(s);
            }
            Self::Tuple(items) | Self::List(items) => {
                hasher.tag(if matches!(self, Self::Tuple(_)) { 5 } else { 6 });
                hasher.update_u64(items.len() as u64);
                for item in items {
                    item.feed(hasher);
                }
            }
            Self::Dict(map) => {
                hasher.tag(7);
                let mut digests: Vec<_> = map
                    .iter()
                    .map(|(key, value)| {
                        let mut sub = Hasher::new("spindle.entry");
                        key.feed(&mut sub);
                        value.feed(&mut sub);
                        sub.finish()
                    })
                    .collect();
                digests.sort_unstable();
                hasher.update_u64(digests.len() as u64);
                for digest in digests {
                    hasher.update(digest.as_bytes());
                }
            }
            Self::Set(set) => {
                hasher.tag(8);
                let mut digests: Vec<_> = set
                    .iter()
                    .map(|item| {
                        let mut sub = Hasher::new("spindle.entry");
                        item.feed(&mut sub);
                        sub.finish()
                    })
                    .collect();
                digests.sort_unstable();
                hasher.update_u64(digests.len() as u64);
                for digest in digests {
                    hasher.update(digest.as_bytes());
                }
            }
            Self::Deferred(deferred) => {
                hasher.tag(9);
                deferred.feed(hasher);
            }
        }
    }

    /// Rejects values Python would refuse as dict keys or set members.
    pub fn check_hashable(&self) -> Result<(), RunError> {
        let ok = match self {
            Self::List(_) | Self::Dict(_) | Self::Set(_) | Self::Deferred(_) => false,
            Self::Tuple(items) => return items.iter().try_for_each(Self::check_hashable),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(RunError::new(
                RunErrorKind::Unhashable,
                format!("unhashable type: '{}'", self.type_name()),
            ))
        }
    }

    pub fn truthy(&self) -> Result<bool, RunError> {
        Ok(match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Tuple(items) | Self::List(items) => !items.is_empty(),
            Self::Dict(map) => !map.is_empty(),
            Self::Set(set) => !set.is_empty(),
            Self::Deferred(_) => {
                return Err(RunError::type_error("deferred result has no truth value"));
            }
        })
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Python `==`: numeric values compare across int/float/bool, containers
    /// compare elementwise, everything else by structure.
    pub fn py_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) | (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }

    /// Python ordering: numbers cross-compare, strings and sequences compare
    /// lexicographically, anything else is a `TypeError`.
    pub fn py_cmp(&self, other: &Self) -> Result<Ordering, RunError> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            (Self::Tuple(a), Self::Tuple(b)) | (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.py_cmp(y)? {
                        Ordering::Equal => {}
                        other => return Ok(other),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| RunError::type_error("nan is unordered")),
                _ => Err(RunError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }

    /// Subscript access: sequence indexing with negative indices, or dict key
    /// lookup.
    pub fn index(&self, index: &Self) -> Result<Self, RunError> {
        match self {
            Self::Tuple(items) | Self::List(items) => {
                let i = index_as_int(index, self.type_name())?;
                let at = normalize_index(i, items.len())
                    .ok_or_else(|| RunError::new(RunErrorKind::Index, format!("{} index out of range", self.type_name())))?;
                Ok(items[at].clone())
            }
            Self::Str(s) => {
                let i = index_as_int(index, "str")?;
                let chars: Vec<char> = s.chars().collect();
                let at = normalize_index(i, chars.len())
                    .ok_or_else(|| RunError::new(RunErrorKind::Index, "string index out of range"))?;
                Ok(Self::Str(chars[at].to_string()))
            }
            Self::Dict(map) => map
                .get(index)
                .cloned()
                .ok_or_else(|| RunError::new(RunErrorKind::Key, index.repr())),
            _ => Err(RunError::type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name()
            ))),
        }
    }

    /// Slice access with Python clamping semantics; step is not supported.
    pub fn slice(&self, lower: Option<i64>, upper: Option<i64>) -> Result<Self, RunError> {
        match self {
            Self::Tuple(items) => {
                let (start, end) = slice_bounds(items.len(), lower, upper);
                Ok(Self::Tuple(items[start..end].to_vec()))
            }
            Self::List(items) => {
                let (start, end) = slice_bounds(items.len(), lower, upper);
                Ok(Self::List(items[start..end].to_vec()))
            }
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), lower, upper);
                Ok(Self::Str(chars[start..end].iter().collect()))
            }
            _ => Err(RunError::type_error(format!(
                "'{}' object is not sliceable",
                self.type_name()
            ))),
        }
    }

    /// The elements produced by iterating this value.
    pub fn elements(&self) -> Result<Vec<Self>, RunError> {
        Ok(match self {
            Self::Tuple(items) | Self::List(items) => items.clone(),
            Self::Set(set) => set.iter().cloned().collect(),
            Self::Dict(map) => map.keys().cloned().collect(),
            Self::Str(s) => s.chars().map(|c| Self::Str(c.to_string())).collect(),
            _ => {
                return Err(RunError::type_error(format!(
                    "'{}' object is not iterable",
                    self.type_name()
                )));
            }
        })
    }

    /// `repr()` rendering.
    pub fn repr(&self) -> String {
        self.to_string()
    }

    /// `str()` rendering: strings come back bare, everything else as `repr()`.
    pub fn str_value(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.repr(),
        }
    }
}

fn index_as_int(index: &Value, container: &str) -> Result<i64, RunError> {
    match index {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(RunError::type_error(format!(
            "{container} indices must be integers, not '{}'",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}

fn slice_bounds(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |bound: i64| -> i64 {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(0, len)
    };
    let start = clamp(lower.unwrap_or(0));
    let end = clamp(upper.unwrap_or(len));
    (start as usize, start.max(end) as usize)
}

/// Applies a binary operator with Python semantics.
pub(crate) fn binary_op(op: Operator, left: &Value, right: &Value) -> Result<Value, RunError> {
    use Value::{Float, Int, List, Str, Tuple};

    if matches!(left, Value::Deferred(_)) || matches!(right, Value::Deferred(_)) {
        return Err(RunError::type_error("cannot operate on a deferred result"));
    }

    let int_pair = match (left, right) {
        (Int(a), Int(b)) => Some((*a, *b)),
        _ => None,
    };

    match op {
        Operator::Add => match (left, right) {
            (Str(a), Str(b)) => return Ok(Str(format!("{a}{b}"))),
            (List(a), List(b)) => return Ok(List([a.as_slice(), b.as_slice()].concat())),
            (Tuple(a), Tuple(b)) => return Ok(Tuple([a.as_slice(), b.as_slice()].concat())),
            _ => {}
        },
        Operator::Mult => {
            let repeat = |items: &[Value], n: i64| -> Vec<Value> {
                let n = n.max(0) as usize;
                items.iter().cloned().cycle().take(items.len() * n).collect()
            };
            match (left, right) {
                (Str(s), Int(n)) | (Int(n), Str(s)) => {
                    return Ok(Str(s.repeat((*n).max(0) as usize)));
                }
                (List(items), Int(n)) | (Int(n), List(items)) => return Ok(List(repeat(items, *n))),
                (Tuple(items), Int(n)) | (Int(n), Tuple(items)) => return Ok(Tuple(repeat(items, *n))),
                _ => {}
            }
        }
        _ => {}
    }

    if let Some((a, b)) = int_pair {
        return int_binary_op(op, a, b);
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(RunError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };
    float_binary_op(op, a, b)
}

fn int_binary_op(op: Operator, a: i64, b: i64) -> Result<Value, RunError> {
    let overflow = || RunError::new(RunErrorKind::Overflow, "integer result too large");
    let checked = |result: Option<i64>| result.map(Value::Int).ok_or_else(overflow);
    match op {
        Operator::Add => checked(a.checked_add(b)),
        Operator::Sub => checked(a.checked_sub(b)),
        Operator::Mult => checked(a.checked_mul(b)),
        Operator::Div => {
            if b == 0 {
                Err(RunError::new(RunErrorKind::ZeroDivision, "division by zero"))
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        Operator::FloorDiv => {
            if b == 0 {
                Err(RunError::new(RunErrorKind::ZeroDivision, "integer division by zero"))
            } else {
                Ok(Value::Int(python_floor_div(a, b)))
            }
        }
        Operator::Mod => {
            if b == 0 {
                Err(RunError::new(RunErrorKind::ZeroDivision, "integer modulo by zero"))
            } else {
                Ok(Value::Int(python_mod(a, b)))
            }
        }
        Operator::Pow => {
            if b < 0 {
                Ok(Value::Float((a as f64).powf(b as f64)))
            } else {
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                checked(a.checked_pow(exp))
            }
        }
        Operator::LShift => checked(u32::try_from(b).ok().and_then(|s| a.checked_shl(s))),
        Operator::RShift => checked(u32::try_from(b).ok().and_then(|s| a.checked_shr(s))),
        Operator::BitOr => Ok(Value::Int(a | b)),
        Operator::BitXor => Ok(Value::Int(a ^ b)),
        Operator::BitAnd => Ok(Value::Int(a & b)),
    }
}

fn float_binary_op(op: Operator, a: f64, b: f64) -> Result<Value, RunError> {
    let zero_division = || RunError::new(RunErrorKind::ZeroDivision, "float division by zero");
    Ok(Value::Float(match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division());
            }
            (a / b).floor()
        }
        Operator::Mod => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a - b * (a / b).floor()
        }
        Operator::Pow => a.powf(b),
        _ => {
            return Err(RunError::type_error(format!(
                "unsupported operand type(s) for {}: 'float' and 'float'",
                op.symbol()
            )));
        }
    }))
}

fn python_floor_div(a: i64, b: i64) -> i64 {
    let quotient = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        quotient - 1
    } else {
        quotient
    }
}

fn python_mod(a: i64, b: i64) -> i64 {
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        remainder + b
    } else {
        remainder
    }
}

/// Applies a unary operator with Python semantics.
pub(crate) fn unary_op(op: UnaryOperator, operand: &Value) -> Result<Value, RunError> {
    match (op, operand) {
        (UnaryOperator::Not, _) => Ok(Value::Bool(!operand.truthy()?)),
        (UnaryOperator::Minus, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOperator::Minus, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Plus, Value::Int(i)) => Ok(Value::Int(*i)),
        (UnaryOperator::Plus, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOperator::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        _ => Err(RunError::type_error(format!(
            "bad operand type for unary operator: '{}'",
            operand.type_name()
        ))),
    }
}

/// Applies one comparison operator with Python semantics.
pub(crate) fn compare_op(op: CmpOperator, left: &Value, right: &Value) -> Result<bool, RunError> {
    Ok(match op {
        CmpOperator::Eq => left.py_eq(right),
        CmpOperator::NotEq => !left.py_eq(right),
        CmpOperator::Lt => left.py_cmp(right)? == Ordering::Less,
        CmpOperator::LtE => left.py_cmp(right)? != Ordering::Greater,
        CmpOperator::Gt => left.py_cmp(right)? == Ordering::Greater,
        CmpOperator::GtE => left.py_cmp(right)? != Ordering::Less,
        // Identity collapses to structural equality in a value-only model.
        CmpOperator::Is => left == right,
        CmpOperator::IsNot => left != right,
        CmpOperator::In => membership(left, right)?,
        CmpOperator::NotIn => !membership(left, right)?,
    })
}

fn membership(needle: &Value, haystack: &Value) -> Result<bool, RunError> {
    Ok(match haystack {
        Value::Tuple(items) | Value::List(items) => items.iter().any(|item| item.py_eq(needle)),
        Value::Set(set) => set.iter().any(|item| item.py_eq(needle)),
        Value::Dict(map) => map.keys().any(|key| key.py_eq(needle)),
        Value::Str(s) => match needle {
            Value::Str(sub) => s.contains(sub.as_str()),
            other => {
                return Err(RunError::type_error(format!(
                    "'in <string>' requires string as left operand, not '{}'",
                    other.type_name()
                )));
            }
        },
        other => {
            return Err(RunError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )));
        }
    })
}

/// Short-circuit `and`/`or` over already-evaluated operands is handled in the
/// evaluator; this helper only reports which operand decides the expression.
pub(crate) fn bool_op_decides(op: BoolOperator, value: &Value) -> Result<bool, RunError> {
    let truthy = value.truthy()?;
    Ok(match op {
        BoolOperator::And => !truthy,
        BoolOperator::Or => truthy,
    })
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn write_str_repr(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "'")?;
    for c in s.chars() {
        match c {
            '\'' => write!(f, "\\'")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "'")
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    /// Python `repr()`-style rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{}", format_float(*v)),
            Self::Str(s) => write_str_repr(f, s),
            Self::Tuple(items) => {
                write!(f, "(")?;
                write_joined(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Self::List(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Self::Dict(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Set(set) => {
                if set.is_empty() {
                    return write!(f, "set()");
                }
                write!(f, "{{")?;
                for (i, item) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Self::Deferred(deferred) => write!(f, "{deferred}"),
        }
    }
}
