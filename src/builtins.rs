//! Builtin signature table
//!
//! Builtins reach the engine as bare tags; this module supplies their type
//! signatures in closed de Bruijn form. The table is read-only and may be
//! shared across inference runs. [`Builtins::core`] populates the standard
//! surface; callers may extend or override entries before running inference.
//!
//! Quantified signatures encode occurrences with de Bruijn indices counting
//! binders inward: for a signature with `n` quantifiers, the variable in
//! slot `i` of the binder list appears in the body as index `n - 1 - i`.

use std::collections::{BTreeMap, HashMap};

use crate::term::BuiltinTag;
use crate::types::{NamedDeBruijn, Prim, Row, Type};

/// Mapping from builtin tag to its closed type signature.
#[derive(Debug, Clone, Default)]
pub struct Builtins {
    sigs: HashMap<BuiltinTag, Type<NamedDeBruijn>>,
}

impl Builtins {
    pub fn new() -> Builtins {
        Builtins::default()
    }

    /// Register (or replace) a signature.
    pub fn insert(&mut self, tag: BuiltinTag, sig: Type<NamedDeBruijn>) {
        self.sigs.insert(tag, sig);
    }

    /// Look up the signature for a tag.
    pub fn signature(&self, tag: BuiltinTag) -> Option<&Type<NamedDeBruijn>> {
        self.sigs.get(&tag)
    }

    /// The standard builtin surface.
    ///
    /// Every tag is mapped except [`BuiltinTag::ReadField`], which has no
    /// field-independent signature; the lowering that knows the concrete
    /// field inserts one (shape `forall a r. {field: a | r} -> a`).
    pub fn core() -> Builtins {
        let mut b = Builtins::new();

        // Integer arithmetic
        for tag in [
            BuiltinTag::Add,
            BuiltinTag::Sub,
            BuiltinTag::Mul,
            BuiltinTag::Div,
            BuiltinTag::Mod,
            BuiltinTag::Pow,
            BuiltinTag::BitAnd,
            BuiltinTag::BitOr,
            BuiltinTag::BitXor,
            BuiltinTag::Shift,
        ] {
            b.insert(tag, binop(int()));
        }
        b.insert(BuiltinTag::Negate, unop(int()));
        b.insert(BuiltinTag::Abs, unop(int()));
        b.insert(BuiltinTag::BitFlip, unop(int()));

        // Decimal arithmetic
        for tag in [
            BuiltinTag::DecAdd,
            BuiltinTag::DecSub,
            BuiltinTag::DecMul,
            BuiltinTag::DecDiv,
        ] {
            b.insert(tag, binop(decimal()));
        }
        b.insert(BuiltinTag::DecNegate, unop(decimal()));
        b.insert(BuiltinTag::DecAbs, unop(decimal()));
        for tag in [BuiltinTag::Round, BuiltinTag::Ceiling, BuiltinTag::Floor] {
            b.insert(tag, Type::fun(decimal(), int()));
        }

        // Integer comparison
        for tag in [
            BuiltinTag::Eq,
            BuiltinTag::Neq,
            BuiltinTag::Lt,
            BuiltinTag::Leq,
            BuiltinTag::Gt,
            BuiltinTag::Geq,
        ] {
            b.insert(tag, Type::funs(vec![int(), int()], bool_()));
        }

        // Booleans
        b.insert(BuiltinTag::Not, unop(bool_()));
        b.insert(BuiltinTag::And, binop(bool_()));
        b.insert(BuiltinTag::Or, binop(bool_()));

        // Lists
        b.insert(
            BuiltinTag::Map,
            forall(&["a", "b"], |v| {
                Type::funs(
                    vec![
                        Type::fun(v[0].clone(), v[1].clone()),
                        Type::list(v[0].clone()),
                    ],
                    Type::list(v[1].clone()),
                )
            }),
        );
        b.insert(
            BuiltinTag::Fold,
            forall(&["a", "b"], |v| {
                Type::funs(
                    vec![
                        Type::funs(vec![v[0].clone(), v[1].clone()], v[0].clone()),
                        v[0].clone(),
                        Type::list(v[1].clone()),
                    ],
                    v[0].clone(),
                )
            }),
        );
        b.insert(
            BuiltinTag::Filter,
            forall(&["a"], |v| {
                Type::funs(
                    vec![Type::fun(v[0].clone(), bool_()), Type::list(v[0].clone())],
                    Type::list(v[0].clone()),
                )
            }),
        );
        b.insert(
            BuiltinTag::ZipWith,
            forall(&["a", "b", "c"], |v| {
                Type::funs(
                    vec![
                        Type::funs(vec![v[0].clone(), v[1].clone()], v[2].clone()),
                        Type::list(v[0].clone()),
                        Type::list(v[1].clone()),
                    ],
                    Type::list(v[2].clone()),
                )
            }),
        );
        // Branches are thunked so only the taken branch runs.
        b.insert(
            BuiltinTag::If,
            forall(&["a"], |v| {
                Type::funs(
                    vec![
                        bool_(),
                        Type::fun(unit(), v[0].clone()),
                        Type::fun(unit(), v[0].clone()),
                    ],
                    v[0].clone(),
                )
            }),
        );
        for tag in [BuiltinTag::Take, BuiltinTag::Drop] {
            b.insert(
                tag,
                forall(&["a"], |v| {
                    Type::funs(vec![int(), Type::list(v[0].clone())], Type::list(v[0].clone()))
                }),
            );
        }
        b.insert(
            BuiltinTag::Length,
            forall(&["a"], |v| Type::fun(Type::list(v[0].clone()), int())),
        );
        b.insert(
            BuiltinTag::Reverse,
            forall(&["a"], |v| {
                Type::fun(Type::list(v[0].clone()), Type::list(v[0].clone()))
            }),
        );
        b.insert(
            BuiltinTag::Head,
            forall(&["a"], |v| Type::fun(Type::list(v[0].clone()), v[0].clone())),
        );
        b.insert(
            BuiltinTag::Distinct,
            Type::fun(Type::list(int()), Type::list(int())),
        );
        b.insert(
            BuiltinTag::Contains,
            Type::funs(vec![int(), Type::list(int())], bool_()),
        );
        b.insert(
            BuiltinTag::Enumerate,
            Type::funs(vec![int(), int()], Type::list(int())),
        );
        b.insert(
            BuiltinTag::EnumerateStep,
            Type::funs(vec![int(), int(), int()], Type::list(int())),
        );

        // Strings
        b.insert(BuiltinTag::IntToStr, Type::fun(int(), string()));
        b.insert(BuiltinTag::StrToInt, Type::fun(string(), int()));
        b.insert(BuiltinTag::Concat, binop(string()));
        b.insert(BuiltinTag::StrLength, Type::fun(string(), int()));
        b.insert(
            BuiltinTag::Format,
            Type::funs(vec![string(), Type::list(string())], string()),
        );
        b.insert(BuiltinTag::Hash, Type::fun(string(), string()));

        // Guards and capabilities
        b.insert(BuiltinTag::Enforce, Type::funs(vec![bool_(), string()], unit()));
        b.insert(BuiltinTag::EnforceGuard, Type::fun(guard(), bool_()));
        b.insert(BuiltinTag::RequireCap, Type::fun(Type::Cap, bool_()));
        b.insert(
            BuiltinTag::ComposeCap,
            Type::funs(vec![Type::Cap, Type::Cap], Type::Cap),
        );

        // Tables. Row polymorphism lets one signature serve every schema.
        b.insert(
            BuiltinTag::ReadRow,
            forall_row("r", |row| {
                Type::funs(
                    vec![Type::Table(row.clone()), string()],
                    Type::Object(row),
                )
            }),
        );
        b.insert(
            BuiltinTag::WriteRow,
            forall_row("r", |row| {
                Type::funs(
                    vec![Type::Table(row.clone()), string(), Type::Object(row)],
                    unit(),
                )
            }),
        );
        b.insert(
            BuiltinTag::Keys,
            forall_row("r", |row| Type::fun(Type::Table(row), Type::list(string()))),
        );

        // Time
        b.insert(BuiltinTag::ParseTime, Type::funs(vec![string(), string()], time()));
        b.insert(BuiltinTag::AddTime, Type::funs(vec![time(), int()], time()));
        b.insert(BuiltinTag::Days, unop(int()));
        b.insert(BuiltinTag::Hours, unop(int()));
        b.insert(BuiltinTag::Minutes, unop(int()));

        b
    }
}

fn int() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::Int)
}

fn decimal() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::Decimal)
}

fn bool_() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::Bool)
}

fn string() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::String)
}

fn unit() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::Unit)
}

fn time() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::Time)
}

fn guard() -> Type<NamedDeBruijn> {
    Type::Prim(Prim::Guard)
}

fn unop(t: Type<NamedDeBruijn>) -> Type<NamedDeBruijn> {
    Type::fun(t.clone(), t)
}

fn binop(t: Type<NamedDeBruijn>) -> Type<NamedDeBruijn> {
    Type::funs(vec![t.clone(), t.clone()], t)
}

/// Build a quantified signature. The closure receives one occurrence per
/// quantifier, in binder order, with de Bruijn indices already computed.
fn forall(
    names: &[&str],
    body: impl FnOnce(&[Type<NamedDeBruijn>]) -> Type<NamedDeBruijn>,
) -> Type<NamedDeBruijn> {
    let n = names.len();
    let binders = names
        .iter()
        .enumerate()
        .map(|(i, name)| NamedDeBruijn::new(i, *name))
        .collect();
    let occurrences: Vec<Type<NamedDeBruijn>> = names
        .iter()
        .enumerate()
        .map(|(i, name)| Type::Var(NamedDeBruijn::new(n - 1 - i, *name)))
        .collect();
    Type::Forall(binders, Box::new(body(&occurrences)))
}

/// Build a signature quantified over a single row variable.
fn forall_row(
    name: &str,
    body: impl FnOnce(Row<NamedDeBruijn>) -> Type<NamedDeBruijn>,
) -> Type<NamedDeBruijn> {
    let binder = NamedDeBruijn::new(0, name);
    let occurrence = Row::Var(NamedDeBruijn::new(0, name));
    Type::Forall(vec![binder], Box::new(body(occurrence)))
}

/// An open-record signature for a single known field, as supplied for
/// [`BuiltinTag::ReadField`] by a lowering that knows the field name:
/// `forall a r. {field: a | r} -> a`.
pub fn read_field_sig(field: &str) -> Type<NamedDeBruijn> {
    let mut fields = BTreeMap::new();
    fields.insert(field.to_string(), Type::Var(NamedDeBruijn::new(1, "a")));
    Type::Forall(
        vec![NamedDeBruijn::new(0, "a"), NamedDeBruijn::new(1, "r")],
        Box::new(Type::fun(
            Type::Object(Row::Fields(fields, Some(NamedDeBruijn::new(0, "r")))),
            Type::Var(NamedDeBruijn::new(1, "a")),
        )),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_covers_every_tag_except_read_field() {
        let b = Builtins::core();
        for tag in BuiltinTag::ALL {
            if *tag == BuiltinTag::ReadField {
                assert!(b.signature(*tag).is_none());
            } else {
                assert!(b.signature(*tag).is_some(), "missing signature for {}", tag);
            }
        }
    }

    #[test]
    fn map_signature_shape() {
        let b = Builtins::core();
        let sig = b.signature(BuiltinTag::Map).unwrap();
        assert_eq!(
            sig.to_string(),
            "forall a b. (a -> b) -> [a] -> [b]"
        );
        // Quantifier occurrences count binders inward: `a` (slot 0 of 2)
        // appears as index 1, `b` as index 0.
        match sig {
            Type::Forall(vars, body) => {
                assert_eq!(vars.len(), 2);
                match body.as_ref() {
                    Type::Fun(f, _) => match f.as_ref() {
                        Type::Fun(a, b) => {
                            assert_eq!(**a, Type::Var(NamedDeBruijn::new(1, "a")));
                            assert_eq!(**b, Type::Var(NamedDeBruijn::new(0, "b")));
                        }
                        other => panic!("expected a -> b, got {}", other),
                    },
                    other => panic!("expected a function, got {}", other),
                }
            }
            other => panic!("expected a quantified type, got {}", other),
        }
    }

    #[test]
    fn read_row_is_row_polymorphic() {
        let b = Builtins::core();
        let sig = b.signature(BuiltinTag::ReadRow).unwrap();
        assert_eq!(sig.to_string(), "forall r. table{r} -> String -> {r}");
    }

    #[test]
    fn read_field_signature_shape() {
        let sig = read_field_sig("balance");
        assert_eq!(sig.to_string(), "forall a r. {balance: a | r} -> a");
    }

    #[test]
    fn arithmetic_is_monomorphic() {
        let b = Builtins::core();
        assert_eq!(
            b.signature(BuiltinTag::Add).unwrap().to_string(),
            "Int -> Int -> Int"
        );
        assert_eq!(
            b.signature(BuiltinTag::Round).unwrap().to_string(),
            "Decimal -> Int"
        );
    }
}
