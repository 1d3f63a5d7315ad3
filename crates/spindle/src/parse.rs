//! Parsing and lowering of workflow function source.
//!
//! Source text is parsed with `rustpython_parser` and immediately lowered into
//! the crate IR. Lowering is where the supported subset is enforced: anything
//! outside it is rejected with a structured error instead of leaking parser
//! AST into the rest of the engine. Decorators are stripped, mirroring how the
//! engine is expected to be fed decorated definitions.

use rustpython_parser::{Mode, ast, parse};

use crate::{
    error::{Error, Result},
    expressions::{
        BoolOperator, CmpOperator, Comprehension, Expr, FunctionDef, Literal, Operator, Param, Stmt, UnaryOperator,
        UnpackTarget,
    },
};

/// Parses source text containing exactly one top-level function definition.
pub(crate) fn parse_function(source: &str) -> Result<FunctionDef> {
    let module = parse(source, Mode::Module, "<workflow>").map_err(|e| Error::Parse(e.to_string()))?;
    let ast::Mod::Module(module) = module else {
        return Err(Error::Parse("expected a module".to_owned()));
    };

    let mut defs = module.body.iter().filter_map(|stmt| match stmt {
        ast::Stmt::FunctionDef(def) => Some(def),
        _ => None,
    });
    let def = defs
        .next()
        .ok_or_else(|| Error::Invalid("source must contain a function definition".to_owned()))?;
    if defs.next().is_some() || module.body.len() != 1 {
        return Err(Error::Invalid(
            "source must contain exactly one function definition".to_owned(),
        ));
    }

    Ok(FunctionDef {
        name: def.name.to_string(),
        params: lower_params(&def.args)?,
        body: lower_stmts(&def.body)?,
    })
}

fn lower_params(args: &ast::Arguments) -> Result<Vec<Param>> {
    if !args.posonlyargs.is_empty() || !args.kwonlyargs.is_empty() {
        return Err(Error::Unsupported("positional-only and keyword-only parameters".to_owned()));
    }
    if args.vararg.is_some() || args.kwarg.is_some() {
        return Err(Error::Unsupported("*args and **kwargs parameters".to_owned()));
    }
    args.args
        .iter()
        .map(|arg| {
            Ok(Param {
                name: arg.def.arg.to_string(),
                default: arg.default.as_deref().map(lower_expr).transpose()?,
            })
        })
        .collect()
}

fn lower_stmts(stmts: &[ast::Stmt]) -> Result<Vec<Stmt>> {
    stmts.iter().map(lower_stmt).collect()
}

fn lower_stmt(stmt: &ast::Stmt) -> Result<Stmt> {
    match stmt {
        ast::Stmt::Expr(expr) => Ok(Stmt::Expr(lower_expr(&expr.value)?)),
        ast::Stmt::Assign(assign) => {
            if assign.targets.len() != 1 {
                return Err(Error::Invalid("multiple assignment targets are not supported".to_owned()));
            }
            Ok(Stmt::Assign {
                target: lower_target(&assign.targets[0])?,
                value: lower_expr(&assign.value)?,
            })
        }
        ast::Stmt::AugAssign(assign) => {
            let ast::Expr::Name(name) = assign.target.as_ref() else {
                return Err(Error::Invalid("mutating assignment is not supported".to_owned()));
            };
            Ok(Stmt::AugAssign {
                name: name.id.to_string(),
                op: lower_operator(assign.op)?,
                value: lower_expr(&assign.value)?,
            })
        }
        ast::Stmt::Return(ret) => Ok(Stmt::Return(ret.value.as_deref().map(lower_expr).transpose()?)),
        ast::Stmt::Pass(_) => Ok(Stmt::Pass),
        ast::Stmt::If(stmt) => Ok(Stmt::If {
            test: lower_expr(&stmt.test)?,
            body: lower_stmts(&stmt.body)?,
            orelse: lower_stmts(&stmt.orelse)?,
        }),
        ast::Stmt::For(stmt) => Ok(Stmt::For {
            target: lower_target(&stmt.target)?,
            iter: lower_expr(&stmt.iter)?,
            body: lower_stmts(&stmt.body)?,
            orelse: lower_stmts(&stmt.orelse)?,
        }),
        ast::Stmt::While(stmt) => Ok(Stmt::While {
            test: lower_expr(&stmt.test)?,
            body: lower_stmts(&stmt.body)?,
            orelse: lower_stmts(&stmt.orelse)?,
        }),
        ast::Stmt::Break(_) => Ok(Stmt::Break),
        ast::Stmt::Continue(_) => Ok(Stmt::Continue),
        ast::Stmt::With(stmt) => lower_constants_block(stmt),
        ast::Stmt::FunctionDef(_) | ast::Stmt::AsyncFunctionDef(_) | ast::Stmt::ClassDef(_) => {
            Err(Error::Unsupported("nested definitions".to_owned()))
        }
        ast::Stmt::Import(_) | ast::Stmt::ImportFrom(_) => Err(Error::Unsupported("imports".to_owned())),
        _ => Err(Error::Unsupported("statement outside the supported subset".to_owned())),
    }
}

/// Recognizes the `with ...:` constants block. The single context item must be
/// a bare ellipsis with no `as` binding.
fn lower_constants_block(stmt: &ast::StmtWith) -> Result<Stmt> {
    let [item] = stmt.items.as_slice() else {
        return Err(Error::Unsupported("with statements other than the constants block".to_owned()));
    };
    let is_ellipsis = matches!(
        &item.context_expr,
        ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Ellipsis)
    );
    if !is_ellipsis || item.optional_vars.is_some() {
        return Err(Error::Unsupported("with statements other than the constants block".to_owned()));
    }
    Ok(Stmt::Constants(lower_stmts(&stmt.body)?))
}

fn lower_target(expr: &ast::Expr) -> Result<UnpackTarget> {
    match expr {
        ast::Expr::Name(name) => Ok(UnpackTarget::Name(name.id.to_string())),
        ast::Expr::Starred(starred) => match starred.value.as_ref() {
            ast::Expr::Name(name) => Ok(UnpackTarget::Starred(name.id.to_string())),
            _ => Err(Error::Unsupported("starred assignment target".to_owned())),
        },
        ast::Expr::Tuple(tuple) => Ok(UnpackTarget::Tuple(
            tuple.elts.iter().map(lower_target).collect::<Result<_>>()?,
        )),
        ast::Expr::List(list) => Ok(UnpackTarget::Tuple(
            list.elts.iter().map(lower_target).collect::<Result<_>>()?,
        )),
        ast::Expr::Subscript(_) | ast::Expr::Attribute(_) => {
            Err(Error::Invalid("mutating assignment is not supported".to_owned()))
        }
        _ => Err(Error::Unsupported("assignment target".to_owned())),
    }
}

fn lower_expr(expr: &ast::Expr) -> Result<Expr> {
    match expr {
        ast::Expr::Constant(constant) => Ok(Expr::Literal(lower_constant(&constant.value)?)),
        ast::Expr::Name(name) => Ok(Expr::Name(name.id.to_string())),
        ast::Expr::Tuple(tuple) => Ok(Expr::Tuple(lower_exprs(&tuple.elts)?)),
        ast::Expr::List(list) => Ok(Expr::List(lower_exprs(&list.elts)?)),
        ast::Expr::Set(set) => Ok(Expr::Set(lower_exprs(&set.elts)?)),
        ast::Expr::Dict(dict) => {
            let mut entries = Vec::with_capacity(dict.values.len());
            for (key, value) in dict.keys.iter().zip(&dict.values) {
                let Some(key) = key else {
                    return Err(Error::Unsupported("dict unpacking".to_owned()));
                };
                entries.push((lower_expr(key)?, lower_expr(value)?));
            }
            Ok(Expr::Dict(entries))
        }
        ast::Expr::BinOp(binop) => Ok(Expr::Op {
            left: Box::new(lower_expr(&binop.left)?),
            op: lower_operator(binop.op)?,
            right: Box::new(lower_expr(&binop.right)?),
        }),
        ast::Expr::BoolOp(boolop) => Ok(Expr::Bool {
            op: match boolop.op {
                ast::BoolOp::And => BoolOperator::And,
                ast::BoolOp::Or => BoolOperator::Or,
            },
            values: lower_exprs(&boolop.values)?,
        }),
        ast::Expr::UnaryOp(unary) => Ok(Expr::Unary {
            op: match unary.op {
                ast::UnaryOp::Not => UnaryOperator::Not,
                ast::UnaryOp::USub => UnaryOperator::Minus,
                ast::UnaryOp::UAdd => UnaryOperator::Plus,
                ast::UnaryOp::Invert => UnaryOperator::Invert,
            },
            operand: Box::new(lower_expr(&unary.operand)?),
        }),
        ast::Expr::Compare(compare) => Ok(Expr::Compare {
            left: Box::new(lower_expr(&compare.left)?),
            ops: compare.ops.iter().map(|op| lower_cmp_operator(*op)).collect(),
            comparators: lower_exprs(&compare.comparators)?,
        }),
        ast::Expr::IfExp(ifexp) => Ok(Expr::IfElse {
            test: Box::new(lower_expr(&ifexp.test)?),
            body: Box::new(lower_expr(&ifexp.body)?),
            orelse: Box::new(lower_expr(&ifexp.orelse)?),
        }),
        ast::Expr::Call(call) => {
            let ast::Expr::Name(function) = call.func.as_ref() else {
                return Err(Error::Unsupported("only calls of plain names are supported".to_owned()));
            };
            let mut kwargs = Vec::with_capacity(call.keywords.len());
            for keyword in &call.keywords {
                let Some(name) = &keyword.arg else {
                    return Err(Error::Unsupported("keyword argument unpacking".to_owned()));
                };
                kwargs.push((name.to_string(), lower_expr(&keyword.value)?));
            }
            Ok(Expr::Call {
                function: function.id.to_string(),
                args: lower_exprs(&call.args)?,
                kwargs,
            })
        }
        ast::Expr::Subscript(subscript) => {
            let object = Box::new(lower_expr(&subscript.value)?);
            if let ast::Expr::Slice(slice) = subscript.slice.as_ref() {
                if slice.step.is_some() {
                    return Err(Error::Unsupported("slice step".to_owned()));
                }
                return Ok(Expr::Slice {
                    object,
                    lower: slice.lower.as_deref().map(lower_expr).transpose()?.map(Box::new),
                    upper: slice.upper.as_deref().map(lower_expr).transpose()?.map(Box::new),
                });
            }
            Ok(Expr::Subscript {
                object,
                index: Box::new(lower_expr(&subscript.slice)?),
            })
        }
        ast::Expr::ListComp(comp) => Ok(Expr::ListComp {
            elt: Box::new(lower_expr(&comp.elt)?),
            generators: lower_generators(&comp.generators)?,
        }),
        ast::Expr::SetComp(comp) => Ok(Expr::SetComp {
            elt: Box::new(lower_expr(&comp.elt)?),
            generators: lower_generators(&comp.generators)?,
        }),
        ast::Expr::DictComp(comp) => Ok(Expr::DictComp {
            key: Box::new(lower_expr(&comp.key)?),
            value: Box::new(lower_expr(&comp.value)?),
            generators: lower_generators(&comp.generators)?,
        }),
        ast::Expr::GeneratorExp(comp) => Ok(Expr::Generator {
            elt: Box::new(lower_expr(&comp.elt)?),
            generators: lower_generators(&comp.generators)?,
        }),
        ast::Expr::Attribute(_) => Err(Error::Unsupported("attribute access".to_owned())),
        ast::Expr::JoinedStr(_) | ast::Expr::FormattedValue(_) => Err(Error::Unsupported("f-strings".to_owned())),
        ast::Expr::Lambda(_) => Err(Error::Unsupported("lambda expressions".to_owned())),
        ast::Expr::Await(_) | ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => {
            Err(Error::Unsupported("await and yield".to_owned()))
        }
        ast::Expr::Starred(_) => Err(Error::Unsupported("starred expression".to_owned())),
        _ => Err(Error::Unsupported("expression outside the supported subset".to_owned())),
    }
}

fn lower_exprs(exprs: &[ast::Expr]) -> Result<Vec<Expr>> {
    exprs.iter().map(lower_expr).collect()
}

fn lower_generators(generators: &[ast::Comprehension]) -> Result<Vec<Comprehension>> {
    generators
        .iter()
        .map(|comp| {
            if comp.is_async {
                return Err(Error::Unsupported("async comprehensions".to_owned()));
            }
            Ok(Comprehension {
                target: lower_target(&comp.target)?,
                iter: lower_expr(&comp.iter)?,
                ifs: comp.ifs.iter().map(lower_expr).collect::<Result<_>>()?,
            })
        })
        .collect()
}

fn lower_constant(constant: &ast::Constant) -> Result<Literal> {
    match constant {
        ast::Constant::None => Ok(Literal::None),
        ast::Constant::Bool(b) => Ok(Literal::Bool(*b)),
        // Round-tripping through the decimal rendering keeps this independent
        // of which bigint backend the parser was built with.
        ast::Constant::Int(i) => i
            .to_string()
            .parse()
            .map(Literal::Int)
            .map_err(|_| Error::Unsupported("integer literal out of range".to_owned())),
        ast::Constant::Float(f) => Ok(Literal::Float(*f)),
        ast::Constant::Str(s) => Ok(Literal::Str(s.clone())),
        _ => Err(Error::Unsupported("constant outside the supported subset".to_owned())),
    }
}

fn lower_operator(op: ast::Operator) -> Result<Operator> {
    Ok(match op {
        ast::Operator::Add => Operator::Add,
        ast::Operator::Sub => Operator::Sub,
        ast::Operator::Mult => Operator::Mult,
        ast::Operator::Div => Operator::Div,
        ast::Operator::FloorDiv => Operator::FloorDiv,
        ast::Operator::Mod => Operator::Mod,
        ast::Operator::Pow => Operator::Pow,
        ast::Operator::LShift => Operator::LShift,
        ast::Operator::RShift => Operator::RShift,
        ast::Operator::BitOr => Operator::BitOr,
        ast::Operator::BitXor => Operator::BitXor,
        ast::Operator::BitAnd => Operator::BitAnd,
        ast::Operator::MatMult => {
            return Err(Error::Unsupported("matrix multiplication".to_owned()));
        }
    })
}

fn lower_cmp_operator(op: ast::CmpOp) -> CmpOperator {
    match op {
        ast::CmpOp::Eq => CmpOperator::Eq,
        ast::CmpOp::NotEq => CmpOperator::NotEq,
        ast::CmpOp::Lt => CmpOperator::Lt,
        ast::CmpOp::LtE => CmpOperator::LtE,
        ast::CmpOp::Gt => CmpOperator::Gt,
        ast::CmpOp::GtE => CmpOperator::GtE,
        ast::CmpOp::Is => CmpOperator::Is,
        ast::CmpOp::IsNot => CmpOperator::IsNot,
        ast::CmpOp::In => CmpOperator::In,
        ast::CmpOp::NotIn => CmpOperator::NotIn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_a_simple_definition() {
        let def = parse_function("def f(a, b='x'):\n    return a + b\n").unwrap();
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params[1].default, Some(Expr::Literal(Literal::Str("x".to_owned()))));
        assert!(matches!(def.body[0], Stmt::Return(Some(_))));
    }

    #[test]
    fn recognizes_the_constants_block() {
        let def = parse_function("def f():\n    with ...:\n        a = g()\n    return a\n").unwrap();
        assert!(matches!(&def.body[0], Stmt::Constants(stmts) if stmts.len() == 1));
    }

    #[test]
    fn rejects_constructs_outside_the_subset() {
        assert!(matches!(
            parse_function("def f():\n    import math\n"),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            parse_function("def f(x):\n    return x.real\n"),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            parse_function("def f():\n    r = a = 1\n"),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(parse_function("def f(:\n"), Err(Error::Parse(_))));
    }

    #[test]
    fn strips_decorators() {
        let def = parse_function("@workflow()\ndef f():\n    return 1\n").unwrap();
        assert_eq!(def.name, "f");
    }
}
