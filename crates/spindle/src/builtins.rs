//! The closed set of builtin functions available to workflow code.
//!
//! Builtins are dispatched by name through a plain enum; an unknown name is a
//! `NameError` at run time (or a missing-definition error at decomposition
//! time), never a silent fallthrough. None of them accept keyword arguments
//! and none of them accept deferred results.

use std::cmp::Ordering;

use crate::{
    error::{RunError, RunErrorKind},
    value::{self, Value},
    expressions::Operator,
};
use strum::{Display, EnumString, IntoStaticStr};

/// A builtin function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Abs,
    Bool,
    Enumerate,
    Float,
    Int,
    Len,
    List,
    Max,
    Min,
    Range,
    Repr,
    Sorted,
    Str,
    Sum,
    Tuple,
    Zip,
}

impl Builtin {
    /// Resolves a name to a builtin, if it is one.
    pub fn lookup(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Invokes the builtin on fully evaluated, ground arguments.
    pub(crate) fn call(self, args: &[Value]) -> Result<Value, RunError> {
        for arg in args {
            if !arg.is_ground() {
                return Err(RunError::type_error(format!(
                    "cannot pass a deferred result to '{self}'"
                )));
            }
        }
        match self {
            Self::Abs => self.unary(args).and_then(|value| match value {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| RunError::new(RunErrorKind::Overflow, "integer result too large")),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(RunError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }),
            Self::Bool => Ok(Value::Bool(self.unary(args)?.truthy()?)),
            Self::Enumerate => {
                let (iterable, rest) = split_first(self, args)?;
                let start = match rest {
                    [] => 0,
                    [Value::Int(start)] => *start,
                    _ => return Err(RunError::type_error("enumerate() start must be an int")),
                };
                let items = iterable
                    .elements()?
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::Tuple(vec![Value::Int(start + i as i64), item]))
                    .collect();
                Ok(Value::List(items))
            }
            Self::Float => match args {
                [] => Ok(Value::Float(0.0)),
                [Value::Bool(b)] => Ok(Value::Float(f64::from(u8::from(*b)))),
                [Value::Int(i)] => Ok(Value::Float(*i as f64)),
                [Value::Float(f)] => Ok(Value::Float(*f)),
                [Value::Str(s)] => s
                    .trim()
                    .parse()
                    .map(Value::Float)
                    .map_err(|_| RunError::value_error(format!("could not convert string to float: '{s}'"))),
                [other] => Err(RunError::type_error(format!(
                    "float() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
                _ => Err(self.arity_error(args.len())),
            },
            Self::Int => match args {
                [] => Ok(Value::Int(0)),
                [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
                [Value::Int(i)] => Ok(Value::Int(*i)),
                [Value::Float(f)] => {
                    let truncated = f.trunc();
                    if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
                        Ok(Value::Int(truncated as i64))
                    } else {
                        Err(RunError::new(RunErrorKind::Overflow, "float too large to convert to int"))
                    }
                }
                [Value::Str(s)] => s
                    .trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| RunError::value_error(format!("invalid literal for int(): '{s}'"))),
                [other] => Err(RunError::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
                _ => Err(self.arity_error(args.len())),
            },
            Self::Len => {
                let length = match self.unary(args)? {
                    Value::Str(s) => s.chars().count(),
                    Value::Tuple(items) | Value::List(items) => items.len(),
                    Value::Dict(map) => map.len(),
                    Value::Set(set) => set.len(),
                    other => {
                        return Err(RunError::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Int(length as i64))
            }
            Self::List => match args {
                [] => Ok(Value::List(Vec::new())),
                [iterable] => Ok(Value::List(iterable.elements()?)),
                _ => Err(self.arity_error(args.len())),
            },
            Self::Max => self.fold_extremum(args, Ordering::Greater),
            Self::Min => self.fold_extremum(args, Ordering::Less),
            Self::Range => {
                let (start, stop, step) = match args {
                    [Value::Int(stop)] => (0, *stop, 1),
                    [Value::Int(start), Value::Int(stop)] => (*start, *stop, 1),
                    [Value::Int(start), Value::Int(stop), Value::Int(step)] => (*start, *stop, *step),
                    _ => return Err(RunError::type_error("range() expects 1 to 3 integer arguments")),
                };
                if step == 0 {
                    return Err(RunError::value_error("range() arg 3 must not be zero"));
                }
                let span = if step > 0 { stop - start } else { start - stop };
                let count = if span <= 0 { 0 } else { (span + step.abs() - 1) / step.abs() };
                if count > 16_777_216 {
                    return Err(RunError::new(RunErrorKind::Resource, "range() result too large"));
                }
                let items = (0..count).map(|i| Value::Int(start + i * step)).collect();
                Ok(Value::List(items))
            }
            Self::Repr => Ok(Value::Str(self.unary(args)?.repr())),
            Self::Sorted => {
                let mut items = self.unary(args)?.elements()?;
                let mut error = None;
                items.sort_by(|a, b| match a.py_cmp(b) {
                    Ok(ordering) => ordering,
                    Err(e) => {
                        error.get_or_insert(e);
                        Ordering::Equal
                    }
                });
                match error {
                    Some(error) => Err(error),
                    None => Ok(Value::List(items)),
                }
            }
            Self::Str => match args {
                [] => Ok(Value::Str(String::new())),
                [value] => Ok(Value::Str(value.str_value())),
                _ => Err(self.arity_error(args.len())),
            },
            Self::Sum => {
                let (iterable, rest) = split_first(self, args)?;
                let mut acc = match rest {
                    [] => Value::Int(0),
                    [start] => start.clone(),
                    _ => return Err(self.arity_error(args.len())),
                };
                for item in iterable.elements()? {
                    acc = value::binary_op(Operator::Add, &acc, &item)?;
                }
                Ok(acc)
            }
            Self::Tuple => match args {
                [] => Ok(Value::Tuple(Vec::new())),
                [iterable] => Ok(Value::Tuple(iterable.elements()?)),
                _ => Err(self.arity_error(args.len())),
            },
            Self::Zip => {
                let columns: Vec<Vec<Value>> = args.iter().map(Value::elements).collect::<Result<_, _>>()?;
                let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
                let items = (0..rows)
                    .map(|row| Value::Tuple(columns.iter().map(|col| col[row].clone()).collect()))
                    .collect();
                Ok(Value::List(items))
            }
        }
    }

    fn unary<'a>(self, args: &'a [Value]) -> Result<&'a Value, RunError> {
        match args {
            [value] => Ok(value),
            _ => Err(self.arity_error(args.len())),
        }
    }

    fn fold_extremum(self, args: &[Value], keep: Ordering) -> Result<Value, RunError> {
        let items = match args {
            [] => return Err(self.arity_error(0)),
            [iterable] => iterable.elements()?,
            many => many.to_vec(),
        };
        let mut best: Option<Value> = None;
        for item in items {
            best = Some(match best {
                None => item,
                Some(current) => {
                    if item.py_cmp(&current)? == keep {
                        item
                    } else {
                        current
                    }
                }
            });
        }
        best.ok_or_else(|| RunError::value_error(format!("{self}() arg is an empty sequence")))
    }

    fn arity_error(self, got: usize) -> RunError {
        RunError::type_error(format!("{self}() does not accept {got} argument(s)"))
    }
}

fn split_first(builtin: Builtin, args: &[Value]) -> Result<(&Value, &[Value]), RunError> {
    args.split_first()
        .map(|(first, rest)| (first, rest))
        .ok_or_else(|| builtin.arity_error(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_sensitively() {
        assert_eq!(Builtin::lookup("len"), Some(Builtin::Len));
        assert_eq!(Builtin::lookup("Len"), None);
        assert_eq!(Builtin::lookup("print"), None);
    }

    #[test]
    fn range_matches_python() {
        let out = Builtin::Range.call(&[Value::Int(2), Value::Int(9), Value::Int(3)]).unwrap();
        assert_eq!(out, Value::list(vec![2.into(), 5.into(), 8.into()]));
        let out = Builtin::Range.call(&[Value::Int(3)]).unwrap();
        assert_eq!(out, Value::list(vec![0.into(), 1.into(), 2.into()]));
        assert!(Builtin::Range.call(&[Value::Int(1), Value::Int(2), Value::Int(0)]).is_err());
    }

    #[test]
    fn sorted_uses_python_ordering() {
        let out = Builtin::Sorted
            .call(&[Value::list(vec![3.into(), 1.0.into(), 2.into()])])
            .unwrap();
        assert_eq!(out, Value::list(vec![1.0.into(), 2.into(), 3.into()]));
        assert!(Builtin::Sorted.call(&[Value::list(vec![1.into(), "a".into()])]).is_err());
    }

    #[test]
    fn deferred_arguments_are_rejected() {
        use crate::graph::{CallNode, Deferred};
        let deferred: Value = Deferred::new(CallNode::new("f", Vec::new())).into();
        let err = Builtin::Len.call(&[deferred]).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::Type);
    }
}
