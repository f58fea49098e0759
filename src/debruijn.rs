//! De Bruijn closure
//!
//! After the final generalization the scheme body and the elaborated term
//! still reference mutable cells. Closure converts both into immutable
//! form: a quantified cell becomes an index counting the binders between
//! its occurrence and the `TyAbs`/`Forall` that introduced it, links are
//! chased and inlined, and row tails that resolved to concrete rows are
//! flattened into their enclosing row. The outputs hold no cell references,
//! so the run's mutable state can be dropped wholesale.
//!
//! Meeting an unbound cell here means generalization was not run at the
//! root; that is the `EscapedVariable` error.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::error::TypeError;
use crate::term::Span;
use crate::typed::{TypedTerm, TypedTermKind};
use crate::types::{NamedDeBruijn, Row, Tv, TvRef, Type, TypeScheme};

/// Maps quantified cells to the display name and absolute index their
/// binder assigned. Cells are keyed by identity.
#[derive(Debug, Default)]
struct CloseEnv {
    slots: HashMap<usize, (String, usize)>,
}

impl CloseEnv {
    fn bind(&mut self, cell: &TvRef, index: usize) {
        self.slots.insert(cell_key(cell), (cell_name(cell), index));
    }

    fn get(&self, cell: &TvRef) -> Option<&(String, usize)> {
        self.slots.get(&cell_key(cell))
    }
}

fn cell_key(cell: &TvRef) -> usize {
    Rc::as_ptr(&cell.0) as usize
}

fn cell_name(cell: &TvRef) -> String {
    match cell.read() {
        Tv::Unbound { name, .. } | Tv::Bound { name, .. } => name,
        Tv::Link(_) => "_".to_string(),
    }
}

/// Close a scheme to a `Forall`-headed type (or the bare body when there
/// are no quantifiers). Indices `0..n-1` are assigned in quantifier order.
pub fn close_scheme(scheme: &TypeScheme, span: &Span) -> Result<Type<NamedDeBruijn>, TypeError> {
    let mut env = CloseEnv::default();
    let n = scheme.vars.len();
    let mut binders = Vec::with_capacity(n);
    for (slot, cell) in scheme.vars.iter().enumerate() {
        env.bind(cell, slot);
        binders.push(NamedDeBruijn::new(slot, cell_name(cell)));
    }
    let body = close_type(&env, n, &scheme.body, span)?;
    if n == 0 {
        Ok(body)
    } else {
        Ok(Type::Forall(binders, Box::new(body)))
    }
}

/// Close an elaborated term. Each `TyAbs` assigns consecutive absolute
/// indices to its variables; every type embedded in the term is closed
/// against the binders in scope at that point.
pub fn close_term(term: &TypedTerm<TvRef>) -> Result<TypedTerm<NamedDeBruijn>, TypeError> {
    let mut env = CloseEnv::default();
    close_term_at(&mut env, 0, term)
}

fn close_term_at(
    env: &mut CloseEnv,
    depth: usize,
    term: &TypedTerm<TvRef>,
) -> Result<TypedTerm<NamedDeBruijn>, TypeError> {
    let span = &term.span;
    let node = match &term.node {
        TypedTermKind::Var(name) => TypedTermKind::Var(name.clone()),

        TypedTermKind::Lam { name, params, body } => {
            let mut closed_params = Vec::with_capacity(params.len());
            for (param, param_ty) in params {
                closed_params.push((param.clone(), close_type(env, depth, param_ty, span)?));
            }
            TypedTermKind::Lam {
                name: name.clone(),
                params: closed_params,
                body: Rc::new(close_term_at(env, depth, body)?),
            }
        }

        TypedTermKind::App { func, args } => TypedTermKind::App {
            func: Rc::new(close_term_at(env, depth, func)?),
            args: args
                .iter()
                .map(|arg| close_term_at(env, depth, arg))
                .collect::<Result<_, _>>()?,
        },

        TypedTermKind::Let { name, value, body } => TypedTermKind::Let {
            name: name.clone(),
            value: Rc::new(close_term_at(env, depth, value)?),
            body: Rc::new(close_term_at(env, depth, body)?),
        },

        TypedTermKind::Block(items) => TypedTermKind::Block(
            items
                .iter()
                .map(|item| close_term_at(env, depth, item))
                .collect::<Result<_, _>>()?,
        ),

        TypedTermKind::Error { message, ty } => TypedTermKind::Error {
            message: message.clone(),
            ty: close_type(env, depth, ty, span)?,
        },

        TypedTermKind::Builtin(tag) => TypedTermKind::Builtin(*tag),

        TypedTermKind::Constant(literal) => TypedTermKind::Constant(literal.clone()),

        TypedTermKind::ObjectLit(fields) => TypedTermKind::ObjectLit(
            fields
                .iter()
                .map(|(name, field)| Ok((name.clone(), close_term_at(env, depth, field)?)))
                .collect::<Result<_, TypeError>>()?,
        ),

        TypedTermKind::ListLit { elem, items } => TypedTermKind::ListLit {
            elem: close_type(env, depth, elem, span)?,
            items: items
                .iter()
                .map(|item| close_term_at(env, depth, item))
                .collect::<Result<_, _>>()?,
        },

        TypedTermKind::TyApp { term: inner, args } => TypedTermKind::TyApp {
            term: Rc::new(close_term_at(env, depth, inner)?),
            args: args
                .iter()
                .map(|arg| close_type(env, depth, arg, span))
                .collect::<Result<_, _>>()?,
        },

        TypedTermKind::TyAbs { vars, body } => {
            let n = vars.len();
            let mut binders = Vec::with_capacity(n);
            for (slot, cell) in vars.iter().enumerate() {
                env.bind(cell, depth + slot);
                binders.push(NamedDeBruijn::new(slot, cell_name(cell)));
            }
            TypedTermKind::TyAbs {
                vars: binders,
                body: Rc::new(close_term_at(env, depth + n, body)?),
            }
        }
    };
    Ok(TypedTerm::new(node, span.clone()))
}

fn close_type(
    env: &CloseEnv,
    depth: usize,
    ty: &Type<TvRef>,
    span: &Span,
) -> Result<Type<NamedDeBruijn>, TypeError> {
    match ty {
        Type::Var(cell) => close_tv(env, depth, cell, span),
        Type::Prim(p) => Ok(Type::Prim(*p)),
        Type::Cap => Ok(Type::Cap),
        Type::Fun(dom, codom) => Ok(Type::fun(
            close_type(env, depth, dom, span)?,
            close_type(env, depth, codom, span)?,
        )),
        Type::List(t) => Ok(Type::list(close_type(env, depth, t, span)?)),
        Type::Object(row) => Ok(Type::Object(close_row(env, depth, row, span)?)),
        Type::Table(row) => Ok(Type::Table(close_row(env, depth, row, span)?)),
        Type::Forall(_, _) => Err(TypeError::Impredicative {
            ty: ty.to_string(),
            span: span.clone(),
        }),
    }
}

fn close_tv(
    env: &CloseEnv,
    depth: usize,
    cell: &TvRef,
    span: &Span,
) -> Result<Type<NamedDeBruijn>, TypeError> {
    if let Some((name, assigned)) = env.get(cell) {
        return Ok(Type::Var(NamedDeBruijn::new(
            depth - assigned - 1,
            name.clone(),
        )));
    }
    match cell.read() {
        Tv::Link(linked) => close_type(env, depth, &linked, span),
        Tv::Unbound { name, .. } => Err(TypeError::EscapedVariable {
            var: name,
            span: span.clone(),
        }),
        Tv::Bound { name, .. } => {
            unreachable!("generalized variable {} has no enclosing binder", name)
        }
    }
}

fn close_row(
    env: &CloseEnv,
    depth: usize,
    row: &Row<TvRef>,
    span: &Span,
) -> Result<Row<NamedDeBruijn>, TypeError> {
    match row {
        Row::Empty => Ok(Row::Empty),
        Row::Var(cell) => close_row_tv(env, depth, cell, span),
        Row::Fields(fields, tail) => {
            let mut closed = BTreeMap::new();
            for (name, field_ty) in fields {
                closed.insert(name.clone(), close_type(env, depth, field_ty, span)?);
            }
            match tail {
                None => Ok(Row::fields(closed, None)),
                Some(cell) => {
                    let rest = close_row_tv(env, depth, cell, span)?;
                    Ok(merge_rows(closed, rest))
                }
            }
        }
    }
}

fn close_row_tv(
    env: &CloseEnv,
    depth: usize,
    cell: &TvRef,
    span: &Span,
) -> Result<Row<NamedDeBruijn>, TypeError> {
    if let Some((name, assigned)) = env.get(cell) {
        return Ok(Row::Var(NamedDeBruijn::new(
            depth - assigned - 1,
            name.clone(),
        )));
    }
    match cell.read() {
        Tv::Link(linked) => match linked.resolve() {
            Type::Object(inner) => close_row(env, depth, &inner, span),
            Type::Var(next) => close_row_tv(env, depth, &next, span),
            other => Err(TypeError::RowLink {
                var: cell_name(cell),
                ty: other.to_string(),
                span: span.clone(),
            }),
        },
        Tv::Unbound { name, .. } => Err(TypeError::EscapedVariable {
            var: name,
            span: span.clone(),
        }),
        Tv::Bound { name, .. } => {
            unreachable!("generalized row variable {} has no enclosing binder", name)
        }
    }
}

/// Inline a closed tail row into its enclosing row's fields.
fn merge_rows(
    mut fields: BTreeMap<String, Type<NamedDeBruijn>>,
    rest: Row<NamedDeBruijn>,
) -> Row<NamedDeBruijn> {
    match rest {
        Row::Empty => Row::fields(fields, None),
        Row::Var(tail) => Row::fields(fields, Some(tail)),
        Row::Fields(more, tail) => {
            for (name, ty) in more {
                fields.entry(name).or_insert(ty);
            }
            Row::fields(fields, tail)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prim;

    fn span() -> Span {
        Span::default()
    }

    fn bound(name: &str, unique: u64) -> TvRef {
        TvRef::new(Tv::Bound {
            name: name.to_string(),
            unique,
        })
    }

    fn unbound(name: &str, unique: u64, level: u32) -> TvRef {
        TvRef::new(Tv::Unbound {
            name: name.to_string(),
            unique,
            level,
        })
    }

    #[test]
    fn close_identity_scheme() {
        let a = bound("a", 0);
        let scheme = TypeScheme {
            vars: vec![a.clone()],
            body: Type::fun(Type::Var(a.clone()), Type::Var(a)),
        };
        let closed = close_scheme(&scheme, &span()).unwrap();
        assert_eq!(
            closed,
            Type::Forall(
                vec![NamedDeBruijn::new(0, "a")],
                Box::new(Type::fun(
                    Type::Var(NamedDeBruijn::new(0, "a")),
                    Type::Var(NamedDeBruijn::new(0, "a")),
                )),
            )
        );
    }

    #[test]
    fn close_two_quantifiers_counts_binders_inward() {
        let a = bound("a", 0);
        let b = bound("b", 1);
        let scheme = TypeScheme {
            vars: vec![a.clone(), b.clone()],
            body: Type::fun(Type::Var(a), Type::Var(b)),
        };
        let closed = close_scheme(&scheme, &span()).unwrap();
        match closed {
            Type::Forall(vars, body) => {
                assert_eq!(vars.len(), 2);
                assert_eq!(
                    *body,
                    Type::fun(
                        Type::Var(NamedDeBruijn::new(1, "a")),
                        Type::Var(NamedDeBruijn::new(0, "b")),
                    )
                );
            }
            other => panic!("expected a quantified type, got {}", other),
        }
    }

    #[test]
    fn monomorphic_scheme_closes_to_bare_body() {
        let scheme = TypeScheme {
            vars: Vec::new(),
            body: Type::Prim(Prim::Int),
        };
        let closed = close_scheme(&scheme, &span()).unwrap();
        assert_eq!(closed, Type::Prim(Prim::Int));
    }

    #[test]
    fn unbound_cell_is_an_escape() {
        let scheme = TypeScheme {
            vars: Vec::new(),
            body: Type::Var(unbound("a_0", 0, 1)),
        };
        let err = close_scheme(&scheme, &span()).unwrap_err();
        assert!(matches!(err, TypeError::EscapedVariable { .. }));
    }

    #[test]
    fn links_are_chased_through() {
        let target = TvRef::new(Tv::Link(Type::Prim(Prim::Bool)));
        let chain = TvRef::new(Tv::Link(Type::Var(target)));
        let scheme = TypeScheme {
            vars: Vec::new(),
            body: Type::list(Type::Var(chain)),
        };
        let closed = close_scheme(&scheme, &span()).unwrap();
        assert_eq!(closed, Type::list(Type::Prim(Prim::Bool)));
    }

    #[test]
    fn linked_row_tail_is_flattened() {
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), Type::Prim(Prim::Bool));
        let tail = TvRef::new(Tv::Link(Type::Object(Row::Fields(inner, None))));

        let mut outer = BTreeMap::new();
        outer.insert("a".to_string(), Type::Prim(Prim::Int));
        let scheme = TypeScheme {
            vars: Vec::new(),
            body: Type::Object(Row::Fields(outer, Some(tail))),
        };

        let closed = close_scheme(&scheme, &span()).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), Type::Prim(Prim::Int));
        expected.insert("b".to_string(), Type::Prim(Prim::Bool));
        assert_eq!(closed, Type::Object(Row::Fields(expected, None)));
    }

    #[test]
    fn nested_type_abstractions_index_relative_to_occurrence() {
        let outer_var = bound("a", 0);
        let inner_var = bound("b", 1);
        let leaf = TypedTerm::new(
            TypedTermKind::Error {
                message: "leaf".to_string(),
                ty: Type::fun(Type::Var(outer_var.clone()), Type::Var(inner_var.clone())),
            },
            span(),
        );
        let inner = TypedTerm::new(
            TypedTermKind::TyAbs {
                vars: vec![inner_var],
                body: Rc::new(leaf),
            },
            span(),
        );
        let outer = TypedTerm::new(
            TypedTermKind::TyAbs {
                vars: vec![outer_var],
                body: Rc::new(inner),
            },
            span(),
        );

        let closed = close_term(&outer).unwrap();
        match &closed.node {
            TypedTermKind::TyAbs { body, .. } => match &body.node {
                TypedTermKind::TyAbs { body, .. } => match &body.node {
                    TypedTermKind::Error { ty, .. } => {
                        // At depth 2, the outer binder (slot 0) is one binder
                        // away, the inner binder (slot 1) zero binders away.
                        assert_eq!(
                            *ty,
                            Type::fun(
                                Type::Var(NamedDeBruijn::new(1, "a")),
                                Type::Var(NamedDeBruijn::new(0, "b")),
                            )
                        );
                    }
                    other => panic!("expected the error leaf, got {:?}", other),
                },
                other => panic!("expected the inner abstraction, got {:?}", other),
            },
            other => panic!("expected the outer abstraction, got {:?}", other),
        }
    }
}
