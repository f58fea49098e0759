//! Support helpers for building IR terms and running inference in tests.
//!
//! The engine has no parser of its own; terms normally arrive from an
//! earlier lowering pass. These builders make hand-constructing terms
//! bearable, with default spans and de Bruijn indices written out at the
//! call site.

use std::rc::Rc;

use chrono::DateTime;
use rust_decimal::Decimal;

use crate::builtins::Builtins;
use crate::error::TypeError;
use crate::infer::{run_infer, InferOutput};
use crate::term::{Arg, BuiltinTag, Literal, Name, Span, Spanned, Term, TermKind};
use crate::types::{NamedDeBruijn, Type};

fn at(node: TermKind) -> Term {
    Spanned::new(node, Span::default())
}

/// A locally bound variable occurrence; index 0 is the innermost binder.
pub fn var(name: &str, index: usize) -> Term {
    at(TermKind::Var(Name::Local {
        name: name.to_string(),
        index,
    }))
}

/// A module-level reference (always rejected by this engine).
pub fn global(name: &str) -> Term {
    at(TermKind::Var(Name::Global(name.to_string())))
}

pub fn lam(name: &str, params: &[&str], body: Term) -> Term {
    at(TermKind::Lam {
        name: name.to_string(),
        params: params.iter().map(|p| Arg::new(*p)).collect(),
        body: Rc::new(body),
    })
}

pub fn app(func: Term, args: Vec<Term>) -> Term {
    at(TermKind::App {
        func: Rc::new(func),
        args,
    })
}

pub fn let_in(name: &str, value: Term, body: Term) -> Term {
    at(TermKind::Let {
        name: name.to_string(),
        ann: None,
        value: Rc::new(value),
        body: Rc::new(body),
    })
}

pub fn block(items: Vec<Term>) -> Term {
    at(TermKind::Block(items))
}

pub fn error(message: &str) -> Term {
    at(TermKind::Error(message.to_string()))
}

pub fn builtin(tag: BuiltinTag) -> Term {
    at(TermKind::Builtin(tag))
}

pub fn dyn_access(object: Term, field: &str) -> Term {
    at(TermKind::DynAccess {
        object: Rc::new(object),
        field: field.to_string(),
    })
}

pub fn int(value: i64) -> Term {
    at(TermKind::Constant(Literal::Int(value)))
}

pub fn decimal(mantissa: i64, scale: u32) -> Term {
    at(TermKind::Constant(Literal::Decimal(Decimal::new(
        mantissa, scale,
    ))))
}

pub fn bool_(value: bool) -> Term {
    at(TermKind::Constant(Literal::Bool(value)))
}

pub fn str_(value: &str) -> Term {
    at(TermKind::Constant(Literal::Str(value.to_string())))
}

pub fn unit() -> Term {
    at(TermKind::Constant(Literal::Unit))
}

/// A time literal at `secs` seconds past the epoch.
pub fn time(secs: i64) -> Term {
    let stamp = DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH);
    at(TermKind::Constant(Literal::Time(stamp)))
}

pub fn guard(name: &str) -> Term {
    at(TermKind::Constant(Literal::Guard(name.to_string())))
}

pub fn object(fields: Vec<(&str, Term)>) -> Term {
    at(TermKind::ObjectLit(
        fields
            .into_iter()
            .map(|(name, term)| (name.to_string(), term))
            .collect(),
    ))
}

pub fn list(items: Vec<Term>) -> Term {
    at(TermKind::ListLit(items))
}

/// Run inference with the standard builtin table and supply 0.
pub fn infer(term: &Term) -> Result<InferOutput, TypeError> {
    run_infer(0, &Builtins::core(), term)
}

/// Run inference against a caller-supplied builtin table.
pub fn infer_with(builtins: &Builtins, term: &Term) -> Result<InferOutput, TypeError> {
    run_infer(0, builtins, term)
}

/// Number of quantifiers on a closed type (0 for a bare type).
pub fn quantifier_count(ty: &Type<NamedDeBruijn>) -> usize {
    match ty {
        Type::Forall(vars, _) => vars.len(),
        _ => 0,
    }
}
