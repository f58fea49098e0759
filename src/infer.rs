//! Level-based Hindley-Milner inference with row polymorphism
//!
//! The engine walks an untyped term, unifying eagerly through mutable
//! union-find cells. Generalization uses the level discipline: every
//! unbound variable records the level it was created at, `let` right-hand
//! sides run one level deeper, and generalization quantifies exactly the
//! variables whose level exceeds the current one. The occurs check lowers
//! levels as it walks so that a variable can never smuggle a deeper
//! variable past its binder.
//!
//! Inference and elaboration happen together: every rule returns the
//! inferred type and the elaborated term, with `TyAbs` inserted at
//! generalization sites and `TyApp` at uses of polymorphic values.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use tracing::trace;

use crate::builtins::Builtins;
use crate::debruijn;
use crate::error::TypeError;
use crate::term::{Name, Span, Term, TermKind};
use crate::typed::{TypedTerm, TypedTermKind};
use crate::types::{NamedDeBruijn, Row, Tv, TvRef, Type, TypeScheme, Unique};

/// The binder stack: maps de Bruijn indices of IR variables to their type
/// schemes. Index 0 is the innermost binder.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    stack: Vec<TypeScheme>,
}

impl TypeEnv {
    pub fn new() -> TypeEnv {
        TypeEnv::default()
    }

    pub fn push(&mut self, scheme: TypeScheme) {
        self.stack.push(scheme);
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn lookup(&self, index: usize) -> Option<&TypeScheme> {
        let len = self.stack.len();
        if index < len {
            Some(&self.stack[len - 1 - index])
        } else {
            None
        }
    }
}

/// Result of a full inference run, closed to de Bruijn form.
#[derive(Debug, Clone)]
pub struct InferOutput {
    /// The principal type: `Forall`-headed if polymorphic, bare otherwise.
    pub ty: Type<NamedDeBruijn>,
    /// The elaborated term.
    pub term: TypedTerm<NamedDeBruijn>,
    /// The next unused unique, so downstream passes can keep allocating.
    pub supply: Unique,
}

/// Infer the principal type scheme of `term` and elaborate it, returning
/// both in closed de Bruijn form.
pub fn run_infer(
    supply: Unique,
    builtins: &Builtins,
    term: &Term,
) -> Result<InferOutput, TypeError> {
    let mut inferencer = Inferencer::new(supply, builtins);
    let mut env = TypeEnv::new();
    trace!(supply, "starting inference run");
    let (ty, elaborated) = inferencer.infer(&mut env, term)?;
    inferencer.leave_level();
    let (scheme, elaborated) = inferencer.generalize(&ty, elaborated);
    let ty = debruijn::close_scheme(&scheme, &term.span)?;
    let term = debruijn::close_term(&elaborated)?;
    Ok(InferOutput {
        ty,
        term,
        supply: inferencer.supply(),
    })
}

/// The inference engine: fresh-variable supply, level register, and the
/// builtin signature table for the run.
pub struct Inferencer<'a> {
    supply: Unique,
    level: u32,
    builtins: &'a Builtins,
}

impl<'a> Inferencer<'a> {
    /// A run starts at level 1: the entry to the driver counts as the first
    /// `let`-like scope. `run_infer` leaves this level before the final
    /// generalization.
    pub fn new(supply: Unique, builtins: &'a Builtins) -> Inferencer<'a> {
        Inferencer {
            supply,
            level: 1,
            builtins,
        }
    }

    /// The next unused unique.
    pub fn supply(&self) -> Unique {
        self.supply
    }

    pub fn current_level(&self) -> u32 {
        self.level
    }

    pub fn enter_level(&mut self) {
        self.level += 1;
    }

    pub fn leave_level(&mut self) {
        self.level -= 1;
    }

    fn fresh_unique(&mut self) -> Unique {
        let unique = self.supply;
        self.supply += 1;
        unique
    }

    /// Allocate a fresh unbound variable at the current level.
    pub fn fresh_tvar(&mut self) -> TvRef {
        let unique = self.fresh_unique();
        TvRef::new(Tv::Unbound {
            name: format!("a_{}", unique),
            unique,
            level: self.level,
        })
    }

    /// Allocate a fresh unbound variable carrying a display name taken from
    /// an imported signature.
    fn fresh_named_tvar(&mut self, name: &str) -> TvRef {
        let unique = self.fresh_unique();
        TvRef::new(Tv::Unbound {
            name: name.to_string(),
            unique,
            level: self.level,
        })
    }

    // ========================================================================
    // Unification
    // ========================================================================

    /// Make two types structurally equal, or fail.
    pub fn unify(
        &mut self,
        left: &Type<TvRef>,
        right: &Type<TvRef>,
        span: &Span,
    ) -> Result<(), TypeError> {
        let left = left.resolve();
        let right = right.resolve();
        trace!(left = %left, right = %right, "unify");
        match (&left, &right) {
            (Type::Var(a), Type::Var(b)) if a.same(b) => Ok(()),
            (Type::Var(v), other) | (other, Type::Var(v)) => self.unify_var(v, other, span),
            (Type::Fun(d1, c1), Type::Fun(d2, c2)) => {
                self.unify(d1, d2, span)?;
                self.unify(c1, c2, span)
            }
            (Type::List(a), Type::List(b)) => self.unify(a, b, span),
            (Type::Object(r1), Type::Object(r2)) => self.unify_row(r1, r2, span),
            (Type::Table(r1), Type::Table(r2)) => self.unify_row(r1, r2, span),
            (Type::Prim(p1), Type::Prim(p2)) if p1 == p2 => Ok(()),
            (Type::Cap, Type::Cap) => Ok(()),
            (expected, found) => Err(TypeError::UnifyMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
                span: span.clone(),
            }),
        }
    }

    /// Unify a variable cell against a type.
    fn unify_var(&mut self, var: &TvRef, ty: &Type<TvRef>, span: &Span) -> Result<(), TypeError> {
        match var.read() {
            Tv::Link(linked) => self.unify(&linked, ty, span),
            // A previously generalized variable re-encountered during
            // elaboration is opaque.
            Tv::Bound { .. } => Ok(()),
            Tv::Unbound { name, level, .. } => {
                self.occurs_check(var, &name, level, ty, span)?;
                var.write(Tv::Link(ty.clone()));
                Ok(())
            }
        }
    }

    /// Occurs check with level lowering: fail if `var` is reachable from
    /// `ty`, and lower every other unbound variable met along the way to
    /// `var`'s level so later generalization cannot over-quantify.
    fn occurs_check(
        &self,
        var: &TvRef,
        var_name: &str,
        var_level: u32,
        ty: &Type<TvRef>,
        span: &Span,
    ) -> Result<(), TypeError> {
        match ty {
            Type::Var(w) => self.occurs_cell(var, var_name, var_level, w, ty, span),
            Type::Fun(dom, codom) => {
                self.occurs_check(var, var_name, var_level, dom, span)?;
                self.occurs_check(var, var_name, var_level, codom, span)
            }
            Type::List(t) => self.occurs_check(var, var_name, var_level, t, span),
            Type::Object(row) | Type::Table(row) => {
                self.occurs_row(var, var_name, var_level, row, span)
            }
            Type::Prim(_) | Type::Cap => Ok(()),
            Type::Forall(_, body) => self.occurs_check(var, var_name, var_level, body, span),
        }
    }

    fn occurs_row(
        &self,
        var: &TvRef,
        var_name: &str,
        var_level: u32,
        row: &Row<TvRef>,
        span: &Span,
    ) -> Result<(), TypeError> {
        match row {
            Row::Empty => Ok(()),
            Row::Var(w) => {
                self.occurs_cell(var, var_name, var_level, w, &Type::Object(row.clone()), span)
            }
            Row::Fields(fields, tail) => {
                for field_ty in fields.values() {
                    self.occurs_check(var, var_name, var_level, field_ty, span)?;
                }
                match tail {
                    None => Ok(()),
                    Some(w) => self.occurs_cell(
                        var,
                        var_name,
                        var_level,
                        w,
                        &Type::Object(row.clone()),
                        span,
                    ),
                }
            }
        }
    }

    fn occurs_cell(
        &self,
        var: &TvRef,
        var_name: &str,
        var_level: u32,
        cell: &TvRef,
        context: &Type<TvRef>,
        span: &Span,
    ) -> Result<(), TypeError> {
        if var.same(cell) {
            return Err(TypeError::OccursCheck {
                var: var_name.to_string(),
                ty: context.to_string(),
                span: span.clone(),
            });
        }
        match cell.read() {
            Tv::Link(linked) => self.occurs_check(var, var_name, var_level, &linked, span),
            Tv::Unbound {
                name,
                unique,
                level,
            } => {
                if level > var_level {
                    cell.write(Tv::Unbound {
                        name,
                        unique,
                        level: var_level,
                    });
                }
                Ok(())
            }
            Tv::Bound { .. } => Ok(()),
        }
    }

    // ========================================================================
    // Row unification
    // ========================================================================

    /// Make two rows equal. Known fields unify pairwise in field-name
    /// order; tails absorb the other side's remainder.
    fn unify_row(
        &mut self,
        left: &Row<TvRef>,
        right: &Row<TvRef>,
        span: &Span,
    ) -> Result<(), TypeError> {
        let left = resolve_row(left, span)?;
        let right = resolve_row(right, span)?;
        match (&left, &right) {
            (Row::Var(a), Row::Var(b)) if a.same(b) => Ok(()),
            (Row::Var(v), other) | (other, Row::Var(v)) => {
                self.unify_var(v, &Type::Object(other.clone()), span)
            }
            (Row::Empty, Row::Empty) => Ok(()),
            (Row::Fields(fields, tail), Row::Empty) | (Row::Empty, Row::Fields(fields, tail)) => {
                if let Some(v) = tail {
                    self.unify_var(v, &Type::Object(Row::Empty), span)?;
                }
                if fields.is_empty() {
                    Ok(())
                } else {
                    Err(TypeError::UnifyMismatch {
                        expected: Type::Object(Row::<TvRef>::Empty).to_string(),
                        found: Type::Object(Row::Fields(fields.clone(), tail.clone())).to_string(),
                        span: span.clone(),
                    })
                }
            }
            (Row::Fields(lfields, ltail), Row::Fields(rfields, rtail)) => {
                self.unify_fields(lfields, ltail, rfields, rtail, span)
            }
        }
    }

    fn unify_fields(
        &mut self,
        lfields: &BTreeMap<String, Type<TvRef>>,
        ltail: &Option<TvRef>,
        rfields: &BTreeMap<String, Type<TvRef>>,
        rtail: &Option<TvRef>,
        span: &Span,
    ) -> Result<(), TypeError> {
        // Shared fields unify pairwise, in field-name order.
        for (name, lty) in lfields {
            if let Some(rty) = rfields.get(name) {
                self.unify(lty, rty, span)?;
            }
        }

        let only_left: BTreeMap<String, Type<TvRef>> = lfields
            .iter()
            .filter(|(name, _)| !rfields.contains_key(*name))
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();
        let only_right: BTreeMap<String, Type<TvRef>> = rfields
            .iter()
            .filter(|(name, _)| !lfields.contains_key(*name))
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();

        let mismatch = |span: &Span| TypeError::UnifyMismatch {
            expected: Type::Object(Row::Fields(lfields.clone(), ltail.clone())).to_string(),
            found: Type::Object(Row::Fields(rfields.clone(), rtail.clone())).to_string(),
            span: span.clone(),
        };

        match (ltail, rtail) {
            // Both closed: the key sets must agree exactly.
            (None, None) => {
                if only_left.is_empty() && only_right.is_empty() {
                    Ok(())
                } else {
                    Err(mismatch(span))
                }
            }
            // Open against closed: the open side's keys must be a subset of
            // the closed side's, and its tail takes the leftover fields.
            (Some(lt), None) => {
                if !only_left.is_empty() {
                    return Err(mismatch(span));
                }
                self.unify_var(lt, &Type::Object(Row::fields(only_right, None)), span)
            }
            (None, Some(rt)) => {
                if !only_right.is_empty() {
                    return Err(mismatch(span));
                }
                self.unify_var(rt, &Type::Object(Row::fields(only_left, None)), span)
            }
            // Both open: each tail absorbs the other side's extra fields,
            // with a fresh tail of its own. The fresh tails are not linked
            // here; later constraints may still unify them.
            (Some(lt), Some(rt)) => {
                let lrest = self.fresh_tvar();
                let rrest = self.fresh_tvar();
                self.unify_var(
                    lt,
                    &Type::Object(Row::fields(only_right, Some(lrest))),
                    span,
                )?;
                self.unify_var(rt, &Type::Object(Row::fields(only_left, Some(rrest))), span)
            }
        }
    }

    // ========================================================================
    // Instantiation
    // ========================================================================

    /// Instantiate a scheme with fresh variables at the current level. A
    /// quantified scheme wraps the elaborated use in a `TyApp` carrying the
    /// fresh type arguments.
    pub fn instantiate(
        &mut self,
        scheme: &TypeScheme,
        term: TypedTerm<TvRef>,
        span: &Span,
    ) -> Result<(Type<TvRef>, TypedTerm<TvRef>), TypeError> {
        if scheme.vars.is_empty() {
            return Ok((scheme.body.clone(), term));
        }
        let mut subst: HashMap<Unique, TvRef> = HashMap::new();
        let mut args = Vec::with_capacity(scheme.vars.len());
        for var in &scheme.vars {
            let fresh = match var.read() {
                Tv::Bound { name, unique } | Tv::Unbound { name, unique, .. } => {
                    let fresh = self.fresh_named_tvar(&name);
                    subst.insert(unique, fresh.clone());
                    fresh
                }
                Tv::Link(_) => unreachable!("scheme quantifier is a link"),
            };
            args.push(Type::Var(fresh));
        }
        let body = subst_type(&scheme.body, &subst, span)?;
        let app_span = term.span.clone();
        let term = TypedTerm::new(
            TypedTermKind::TyApp {
                term: Rc::new(term),
                args,
            },
            app_span,
        );
        Ok((body, term))
    }

    /// Open an imported signature (closed de Bruijn form): allocate one
    /// fresh variable per quantifier, in binder order, and substitute the
    /// indexed occurrences. Returns the opened body and the fresh cells for
    /// the caller's `TyApp` elaboration.
    pub fn instantiate_imported(
        &mut self,
        ty: &Type<NamedDeBruijn>,
        span: &Span,
    ) -> Result<(Type<TvRef>, Vec<TvRef>), TypeError> {
        match ty {
            Type::Forall(vars, body) => {
                let fresh: Vec<TvRef> = vars
                    .iter()
                    .map(|v| self.fresh_named_tvar(&v.name))
                    .collect();
                let opened = open_type(body, &fresh, span)?;
                Ok((opened, fresh))
            }
            _ => Ok((open_type(ty, &[], span)?, Vec::new())),
        }
    }

    // ========================================================================
    // Generalization
    // ========================================================================

    /// Quantify every variable reachable from `ty` whose level is strictly
    /// deeper than the current one, in first-visit order. A non-empty
    /// quantifier list wraps the elaborated term in a `TyAbs`.
    pub fn generalize(
        &mut self,
        ty: &Type<TvRef>,
        term: TypedTerm<TvRef>,
    ) -> (TypeScheme, TypedTerm<TvRef>) {
        let mut seen: HashSet<Unique> = HashSet::new();
        let mut vars: Vec<TvRef> = Vec::new();
        self.collect_quantifiers(ty, &mut seen, &mut vars);
        trace!(quantifiers = vars.len(), "generalize");

        let scheme = TypeScheme {
            vars: vars.clone(),
            body: ty.clone(),
        };
        let term = if vars.is_empty() {
            term
        } else {
            let span = term.span.clone();
            TypedTerm::new(
                TypedTermKind::TyAbs {
                    vars,
                    body: Rc::new(term),
                },
                span,
            )
        };
        (scheme, term)
    }

    fn collect_quantifiers(
        &self,
        ty: &Type<TvRef>,
        seen: &mut HashSet<Unique>,
        out: &mut Vec<TvRef>,
    ) {
        match ty {
            Type::Var(v) => self.collect_cell(v, seen, out),
            Type::Fun(dom, codom) => {
                self.collect_quantifiers(dom, seen, out);
                self.collect_quantifiers(codom, seen, out);
            }
            Type::List(t) => self.collect_quantifiers(t, seen, out),
            Type::Object(row) | Type::Table(row) => {
                self.collect_row_quantifiers(row, seen, out)
            }
            Type::Prim(_) | Type::Cap => {}
            Type::Forall(_, body) => self.collect_quantifiers(body, seen, out),
        }
    }

    fn collect_row_quantifiers(
        &self,
        row: &Row<TvRef>,
        seen: &mut HashSet<Unique>,
        out: &mut Vec<TvRef>,
    ) {
        match row {
            Row::Empty => {}
            Row::Var(v) => self.collect_cell(v, seen, out),
            Row::Fields(fields, tail) => {
                for field_ty in fields.values() {
                    self.collect_quantifiers(field_ty, seen, out);
                }
                if let Some(v) = tail {
                    self.collect_cell(v, seen, out);
                }
            }
        }
    }

    fn collect_cell(&self, cell: &TvRef, seen: &mut HashSet<Unique>, out: &mut Vec<TvRef>) {
        match cell.read() {
            // A linked tail's fields are visited in place, so flattening a
            // row cannot drop a quantifier position.
            Tv::Link(linked) => self.collect_quantifiers(&linked, seen, out),
            Tv::Unbound {
                name,
                unique,
                level,
            } if level > self.level => {
                if seen.insert(unique) {
                    cell.write(Tv::Bound { name, unique });
                    out.push(cell.clone());
                }
            }
            // Shallower variables escape to an outer scope and stay free.
            Tv::Unbound { .. } => {}
            Tv::Bound { .. } => {}
        }
    }

    // ========================================================================
    // Inference driver
    // ========================================================================

    /// Infer a type for `term` and elaborate it.
    pub fn infer(
        &mut self,
        env: &mut TypeEnv,
        term: &Term,
    ) -> Result<(Type<TvRef>, TypedTerm<TvRef>), TypeError> {
        let span = &term.span;
        match &term.node {
            TermKind::Var(name @ Name::Local { name: display, index }) => {
                let scheme = env.lookup(*index).cloned().ok_or_else(|| {
                    TypeError::UnboundVariable {
                        name: display.clone(),
                        index: *index,
                        span: span.clone(),
                    }
                })?;
                let occurrence = TypedTerm::new(TypedTermKind::Var(name.clone()), span.clone());
                self.instantiate(&scheme, occurrence, span)
            }

            TermKind::Var(Name::Global(name)) => Err(TypeError::UnsupportedTopLevel {
                name: name.clone(),
                span: span.clone(),
            }),

            TermKind::Lam { name, params, body } => {
                let mut typed_params = Vec::with_capacity(params.len());
                for param in params {
                    // Annotations are ignored: every parameter gets a fresh
                    // variable.
                    let tv = Type::Var(self.fresh_tvar());
                    env.push(TypeScheme::mono(tv.clone()));
                    typed_params.push((param.name.clone(), tv));
                }
                let result = self.infer(env, body);
                for _ in params {
                    env.pop();
                }
                let (body_ty, body_term) = result?;

                let fun_ty = typed_params
                    .iter()
                    .rev()
                    .fold(body_ty, |acc, (_, param_ty)| {
                        Type::fun(param_ty.clone(), acc)
                    });
                Ok((
                    fun_ty,
                    TypedTerm::new(
                        TypedTermKind::Lam {
                            name: name.clone(),
                            params: typed_params,
                            body: Rc::new(body_term),
                        },
                        span.clone(),
                    ),
                ))
            }

            TermKind::App { func, args } => {
                let (mut fun_ty, fun_term) = self.infer(env, func)?;
                let mut typed_args = Vec::with_capacity(args.len());
                for arg in args {
                    let result_ty = Type::Var(self.fresh_tvar());
                    let (arg_ty, arg_term) = self.infer(env, arg)?;
                    self.unify(&fun_ty, &Type::fun(arg_ty, result_ty.clone()), &arg.span)?;
                    fun_ty = result_ty;
                    typed_args.push(arg_term);
                }
                Ok((
                    fun_ty,
                    TypedTerm::new(
                        TypedTermKind::App {
                            func: Rc::new(fun_term),
                            args: typed_args,
                        },
                        span.clone(),
                    ),
                ))
            }

            TermKind::Let {
                name,
                ann: _,
                value,
                body,
            } => {
                self.enter_level();
                let value_result = self.infer(env, value);
                self.leave_level();
                let (value_ty, value_term) = value_result?;
                let (scheme, value_term) = self.generalize(&value_ty, value_term);

                env.push(scheme);
                let body_result = self.infer(env, body);
                env.pop();
                let (body_ty, body_term) = body_result?;

                Ok((
                    body_ty,
                    TypedTerm::new(
                        TypedTermKind::Let {
                            name: name.clone(),
                            value: Rc::new(value_term),
                            body: Rc::new(body_term),
                        },
                        span.clone(),
                    ),
                ))
            }

            TermKind::Block(terms) => {
                if terms.is_empty() {
                    return Err(TypeError::Unsupported {
                        what: "empty block".to_string(),
                        span: span.clone(),
                    });
                }
                let mut block_ty = Type::Prim(crate::types::Prim::Unit);
                let mut typed = Vec::with_capacity(terms.len());
                for item in terms {
                    let (item_ty, item_term) = self.infer(env, item)?;
                    block_ty = item_ty;
                    typed.push(item_term);
                }
                Ok((
                    block_ty,
                    TypedTerm::new(TypedTermKind::Block(typed), span.clone()),
                ))
            }

            TermKind::Error(message) => {
                // An error term takes on whatever type its context demands.
                let ty = Type::Var(self.fresh_tvar());
                Ok((
                    ty.clone(),
                    TypedTerm::new(
                        TypedTermKind::Error {
                            message: message.clone(),
                            ty,
                        },
                        span.clone(),
                    ),
                ))
            }

            TermKind::Builtin(tag) => {
                let sig = self.builtins.signature(*tag).ok_or_else(|| {
                    TypeError::Unsupported {
                        what: format!("builtin {} has no signature", tag),
                        span: span.clone(),
                    }
                })?;
                let sig = sig.clone();
                let (ty, fresh) = self.instantiate_imported(&sig, span)?;
                let builtin = TypedTerm::new(TypedTermKind::Builtin(*tag), span.clone());
                let term = if fresh.is_empty() {
                    builtin
                } else {
                    TypedTerm::new(
                        TypedTermKind::TyApp {
                            term: Rc::new(builtin),
                            args: fresh.into_iter().map(Type::Var).collect(),
                        },
                        span.clone(),
                    )
                };
                Ok((ty, term))
            }

            TermKind::Constant(literal) => Ok((
                Type::Prim(literal.prim()),
                TypedTerm::new(TypedTermKind::Constant(literal.clone()), span.clone()),
            )),

            TermKind::ObjectLit(fields) => {
                // Object literals are closed rows: the fields are exact.
                let mut field_tys = BTreeMap::new();
                let mut typed_fields = Vec::with_capacity(fields.len());
                for (field_name, field_term) in fields {
                    let (field_ty, typed_field) = self.infer(env, field_term)?;
                    field_tys.insert(field_name.clone(), field_ty);
                    typed_fields.push((field_name.clone(), typed_field));
                }
                Ok((
                    Type::Object(Row::fields(field_tys, None)),
                    TypedTerm::new(TypedTermKind::ObjectLit(typed_fields), span.clone()),
                ))
            }

            TermKind::ListLit(items) => {
                // An empty list keeps its element variable free, so a
                // let-bound empty list generalizes.
                let elem = Type::Var(self.fresh_tvar());
                let mut typed = Vec::with_capacity(items.len());
                for item in items {
                    let (item_ty, item_term) = self.infer(env, item)?;
                    self.unify(&item_ty, &elem, &item.span)?;
                    typed.push(item_term);
                }
                Ok((
                    Type::list(elem.clone()),
                    TypedTerm::new(
                        TypedTermKind::ListLit { elem, items: typed },
                        span.clone(),
                    ),
                ))
            }

            TermKind::DynAccess { field, .. } => Err(TypeError::Unsupported {
                what: format!("dynamic access .{}", field),
                span: span.clone(),
            }),
        }
    }
}

/// Resolve a row variable to its representative row, following links
/// through the record wrapper.
fn resolve_row(row: &Row<TvRef>, span: &Span) -> Result<Row<TvRef>, TypeError> {
    match row {
        Row::Var(v) => match v.read() {
            Tv::Link(linked) => match linked.resolve() {
                Type::Object(inner) => resolve_row(&inner, span),
                Type::Var(w) => Ok(Row::Var(w)),
                other => Err(TypeError::RowLink {
                    var: v.to_string(),
                    ty: other.to_string(),
                    span: span.clone(),
                }),
            },
            _ => Ok(row.clone()),
        },
        _ => Ok(row.clone()),
    }
}

/// Copy a scheme body, replacing quantified (`Bound`) cells according to
/// `subst`. Unbound cells are shared, links are followed and copied through
/// so that quantified variables behind links are still replaced.
fn subst_type(
    ty: &Type<TvRef>,
    subst: &HashMap<Unique, TvRef>,
    span: &Span,
) -> Result<Type<TvRef>, TypeError> {
    match ty {
        Type::Var(v) => match v.read() {
            Tv::Bound { unique, .. } => match subst.get(&unique) {
                Some(fresh) => Ok(Type::Var(fresh.clone())),
                None => Ok(ty.clone()),
            },
            Tv::Link(linked) => subst_type(&linked, subst, span),
            Tv::Unbound { .. } => Ok(ty.clone()),
        },
        Type::Prim(_) | Type::Cap => Ok(ty.clone()),
        Type::Fun(dom, codom) => Ok(Type::fun(
            subst_type(dom, subst, span)?,
            subst_type(codom, subst, span)?,
        )),
        Type::List(t) => Ok(Type::list(subst_type(t, subst, span)?)),
        Type::Object(row) => Ok(Type::Object(subst_row(row, subst, span)?)),
        Type::Table(row) => Ok(Type::Table(subst_row(row, subst, span)?)),
        Type::Forall(vars, body) => Ok(Type::Forall(
            vars.clone(),
            Box::new(subst_type(body, subst, span)?),
        )),
    }
}

fn subst_row(
    row: &Row<TvRef>,
    subst: &HashMap<Unique, TvRef>,
    span: &Span,
) -> Result<Row<TvRef>, TypeError> {
    match row {
        Row::Empty => Ok(Row::Empty),
        Row::Var(v) => subst_row_cell(BTreeMap::new(), v, subst, span),
        Row::Fields(fields, tail) => {
            let mut copied = BTreeMap::new();
            for (name, field_ty) in fields {
                copied.insert(name.clone(), subst_type(field_ty, subst, span)?);
            }
            match tail {
                None => Ok(Row::fields(copied, None)),
                Some(v) => subst_row_cell(copied, v, subst, span),
            }
        }
    }
}

/// Substitute through a row tail, inlining any row the tail is linked to.
fn subst_row_cell(
    mut fields: BTreeMap<String, Type<TvRef>>,
    cell: &TvRef,
    subst: &HashMap<Unique, TvRef>,
    span: &Span,
) -> Result<Row<TvRef>, TypeError> {
    match cell.read() {
        Tv::Bound { unique, .. } => {
            let tail = subst.get(&unique).cloned().unwrap_or_else(|| cell.clone());
            Ok(Row::fields(fields, Some(tail)))
        }
        Tv::Unbound { .. } => Ok(Row::fields(fields, Some(cell.clone()))),
        Tv::Link(linked) => match subst_type(&linked, subst, span)? {
            Type::Object(inner) => match inner {
                Row::Empty => Ok(Row::fields(fields, None)),
                Row::Var(v) => Ok(Row::fields(fields, Some(v))),
                Row::Fields(more, tail) => {
                    fields.extend(more);
                    Ok(Row::fields(fields, tail))
                }
            },
            Type::Var(v) => Ok(Row::fields(fields, Some(v))),
            other => Err(TypeError::RowLink {
                var: cell.to_string(),
                ty: other.to_string(),
                span: span.clone(),
            }),
        },
    }
}

/// Open a closed (de Bruijn) type against fresh cells allocated for its
/// quantifiers. `vars` is in binder order; an occurrence with index `i`
/// refers to slot `vars.len() - 1 - i`.
fn open_type(
    ty: &Type<NamedDeBruijn>,
    vars: &[TvRef],
    span: &Span,
) -> Result<Type<TvRef>, TypeError> {
    match ty {
        Type::Var(db) => Ok(Type::Var(open_cell(db, vars, span)?)),
        Type::Prim(p) => Ok(Type::Prim(*p)),
        Type::Cap => Ok(Type::Cap),
        Type::Fun(dom, codom) => Ok(Type::fun(
            open_type(dom, vars, span)?,
            open_type(codom, vars, span)?,
        )),
        Type::List(t) => Ok(Type::list(open_type(t, vars, span)?)),
        Type::Object(row) => Ok(Type::Object(open_row(row, vars, span)?)),
        Type::Table(row) => Ok(Type::Table(open_row(row, vars, span)?)),
        Type::Forall(_, _) => Err(TypeError::Impredicative {
            ty: ty.to_string(),
            span: span.clone(),
        }),
    }
}

fn open_row(
    row: &Row<NamedDeBruijn>,
    vars: &[TvRef],
    span: &Span,
) -> Result<Row<TvRef>, TypeError> {
    match row {
        Row::Empty => Ok(Row::Empty),
        Row::Var(db) => Ok(Row::Var(open_cell(db, vars, span)?)),
        Row::Fields(fields, tail) => {
            let mut opened = BTreeMap::new();
            for (name, field_ty) in fields {
                opened.insert(name.clone(), open_type(field_ty, vars, span)?);
            }
            let tail = match tail {
                None => None,
                Some(db) => Some(open_cell(db, vars, span)?),
            };
            Ok(Row::fields(opened, tail))
        }
    }
}

fn open_cell(db: &NamedDeBruijn, vars: &[TvRef], span: &Span) -> Result<TvRef, TypeError> {
    let n = vars.len();
    if db.index < n {
        Ok(vars[n - 1 - db.index].clone())
    } else {
        Err(TypeError::EscapedVariable {
            var: db.name.clone(),
            span: span.clone(),
        })
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

    fn level_of(v: &TvRef) -> u32 {
        match v.read() {
            Tv::Unbound { level, .. } => level,
            other => panic!("expected unbound, got {:?}", other),
        }
    }

    #[test]
    fn unify_links_a_variable() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let v = Type::Var(inf.fresh_tvar());
        inf.unify(&v, &Type::Prim(Prim::Int), &span()).unwrap();
        assert_eq!(v.resolve(), Type::Prim(Prim::Int));
    }

    #[test]
    fn unify_prim_mismatch() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let err = inf
            .unify(&Type::Prim(Prim::Int), &Type::Prim(Prim::Bool), &span())
            .unwrap_err();
        assert!(matches!(err, TypeError::UnifyMismatch { .. }));
    }

    #[test]
    fn occurs_check_rejects_cycles() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let v = inf.fresh_tvar();
        let err = inf
            .unify(
                &Type::Var(v.clone()),
                &Type::fun(Type::Var(v), Type::Prim(Prim::Int)),
                &span(),
            )
            .unwrap_err();
        assert!(matches!(err, TypeError::OccursCheck { .. }));
    }

    #[test]
    fn occurs_check_lowers_levels() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let shallow = inf.fresh_tvar();
        inf.enter_level();
        inf.enter_level();
        let deep = inf.fresh_tvar();
        assert_eq!(level_of(&deep), 3);

        inf.unify(
            &Type::Var(shallow),
            &Type::list(Type::Var(deep.clone())),
            &span(),
        )
        .unwrap();
        assert_eq!(level_of(&deep), 1);
    }

    #[test]
    fn var_var_unification_lowers_the_deeper_side() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let outer = inf.fresh_tvar();
        inf.enter_level();
        let inner = inf.fresh_tvar();

        inf.unify(&Type::Var(outer), &Type::Var(inner.clone()), &span())
            .unwrap();
        assert_eq!(level_of(&inner), 1);
    }

    #[test]
    fn open_rows_absorb_each_others_fields() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);

        let ltail = inf.fresh_tvar();
        let rtail = inf.fresh_tvar();
        let mut lfields = BTreeMap::new();
        lfields.insert("a".to_string(), Type::Prim(Prim::Int));
        let mut rfields = BTreeMap::new();
        rfields.insert("b".to_string(), Type::Prim(Prim::Bool));

        let left = Type::Object(Row::Fields(lfields, Some(ltail)));
        let right = Type::Object(Row::Fields(rfields, Some(rtail)));
        inf.unify(&left, &right, &span()).unwrap();

        // Both sides must now accept the union row.
        let mut both = BTreeMap::new();
        both.insert("a".to_string(), Type::Prim(Prim::Int));
        both.insert("b".to_string(), Type::Prim(Prim::Bool));
        let closed = Type::Object(Row::Fields(both, None));
        inf.unify(&left, &closed, &span()).unwrap();
        inf.unify(&right, &closed, &span()).unwrap();
    }

    #[test]
    fn open_row_key_must_be_subset_of_closed_row() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);

        let tail = inf.fresh_tvar();
        let mut open_fields = BTreeMap::new();
        open_fields.insert("name".to_string(), Type::Prim(Prim::String));
        let mut closed_fields = BTreeMap::new();
        closed_fields.insert("age".to_string(), Type::Prim(Prim::Int));

        let err = inf
            .unify(
                &Type::Object(Row::Fields(open_fields, Some(tail))),
                &Type::Object(Row::Fields(closed_fields, None)),
                &span(),
            )
            .unwrap_err();
        assert!(matches!(err, TypeError::UnifyMismatch { .. }));
    }

    #[test]
    fn generalize_quantifies_only_deeper_variables() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let shallow = inf.fresh_tvar();
        inf.enter_level();
        let deep = inf.fresh_tvar();

        let ty = Type::fun(Type::Var(shallow.clone()), Type::Var(deep));
        let placeholder = TypedTerm::new(
            TypedTermKind::Error {
                message: "placeholder".to_string(),
                ty: ty.clone(),
            },
            span(),
        );
        let (scheme, _) = inf.generalize(&ty, placeholder);

        assert_eq!(scheme.vars.len(), 1);
        assert!(matches!(shallow.read(), Tv::Unbound { .. }));
        assert!(matches!(scheme.vars[0].read(), Tv::Bound { .. }));
    }

    #[test]
    fn instantiation_is_fresh_per_use() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);

        inf.enter_level();
        let v = inf.fresh_tvar();
        inf.leave_level();
        let ty = Type::fun(Type::Var(v.clone()), Type::Var(v));
        let placeholder = TypedTerm::new(
            TypedTermKind::Error {
                message: "placeholder".to_string(),
                ty: ty.clone(),
            },
            span(),
        );
        let (scheme, _) = inf.generalize(&ty, placeholder);
        assert_eq!(scheme.vars.len(), 1);

        let use_site = |inf: &mut Inferencer| {
            let occurrence = TypedTerm::new(
                TypedTermKind::Var(Name::Local {
                    name: "id".to_string(),
                    index: 0,
                }),
                span(),
            );
            inf.instantiate(&scheme, occurrence, &span()).unwrap().0
        };

        let first = use_site(&mut inf);
        let second = use_site(&mut inf);
        inf.unify(
            &first,
            &Type::fun(Type::Prim(Prim::Int), Type::Prim(Prim::Int)),
            &span(),
        )
        .unwrap();
        inf.unify(
            &second,
            &Type::fun(Type::Prim(Prim::Bool), Type::Prim(Prim::Bool)),
            &span(),
        )
        .unwrap();
    }

    #[test]
    fn imported_signature_respects_binder_order() {
        let builtins = Builtins::core();
        let mut inf = Inferencer::new(0, &builtins);
        let sig = builtins
            .signature(crate::term::BuiltinTag::Map)
            .unwrap()
            .clone();
        let (ty, fresh) = inf.instantiate_imported(&sig, &span()).unwrap();
        assert_eq!(fresh.len(), 2);

        // map : (a -> b) -> [a] -> [b]; the domain of the first argument is
        // the first quantifier.
        match ty {
            Type::Fun(f, rest) => {
                match f.as_ref() {
                    Type::Fun(a, b) => {
                        match (a.as_ref(), b.as_ref()) {
                            (Type::Var(a), Type::Var(b)) => {
                                assert!(a.same(&fresh[0]));
                                assert!(b.same(&fresh[1]));
                            }
                            other => panic!("expected variables, got {:?}", other),
                        }
                    }
                    other => panic!("expected a function domain, got {}", other),
                }
                match rest.as_ref() {
                    Type::Fun(list_a, _) => match list_a.as_ref() {
                        Type::List(a) => match a.as_ref() {
                            Type::Var(a) => assert!(a.same(&fresh[0])),
                            other => panic!("expected a variable, got {}", other),
                        },
                        other => panic!("expected a list, got {}", other),
                    },
                    other => panic!("expected a function, got {}", other),
                }
            }
            other => panic!("expected a function, got {}", other),
        }
    }

    #[test]
    fn imported_nested_quantifier_is_rejected() {
        let builtins = Builtins::new();
        let mut inf = Inferencer::new(0, &builtins);
        let bad: Type<NamedDeBruijn> = Type::list(Type::Forall(
            vec![NamedDeBruijn::new(0, "a")],
            Box::new(Type::Var(NamedDeBruijn::new(0, "a"))),
        ));
        let err = inf.instantiate_imported(&bad, &span()).unwrap_err();
        assert!(matches!(err, TypeError::Impredicative { .. }));
    }
}
