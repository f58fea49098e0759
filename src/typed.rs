//! Elaborated, typed terms
//!
//! Elaboration runs together with inference and mirrors the untyped term
//! shape, adding explicit type abstractions (`TyAbs`) at generalization
//! sites and type applications (`TyApp`) at uses of polymorphic values.
//! Lambda parameters, list literals, and error terms carry their resolved
//! types.
//!
//! Like [`crate::types::Type`], typed terms are generic over the variable
//! representation: inference produces `TypedTerm<TvRef>`, de Bruijn closure
//! turns it into `TypedTerm<NamedDeBruijn>` with no references to mutable
//! cells.

use std::rc::Rc;

use crate::term::{BuiltinTag, Ident, Literal, Name, Spanned};
use crate::types::Type;

/// A typed term over variable representation `V`
pub type TypedTerm<V> = Spanned<TypedTermKind<V>>;

#[derive(Debug, Clone)]
pub enum TypedTermKind<V> {
    /// Variable occurrence
    Var(Name),

    /// Lambda with an explicit type per parameter
    Lam {
        name: Ident,
        params: Vec<(Ident, Type<V>)>,
        body: Rc<TypedTerm<V>>,
    },

    /// Application
    App {
        func: Rc<TypedTerm<V>>,
        args: Vec<TypedTerm<V>>,
    },

    /// Let binding; a polymorphic right-hand side is a `TyAbs`
    Let {
        name: Ident,
        value: Rc<TypedTerm<V>>,
        body: Rc<TypedTerm<V>>,
    },

    /// Sequence of terms
    Block(Vec<TypedTerm<V>>),

    /// Runtime error carrying its result type
    Error { message: String, ty: Type<V> },

    /// Builtin operation
    Builtin(BuiltinTag),

    /// Literal constant
    Constant(Literal),

    /// Object literal; fields keep their source order
    ObjectLit(Vec<(Ident, TypedTerm<V>)>),

    /// List literal carrying its element type
    ListLit {
        elem: Type<V>,
        items: Vec<TypedTerm<V>>,
    },

    /// Type application at a use of a polymorphic value; `args` is non-empty
    TyApp {
        term: Rc<TypedTerm<V>>,
        args: Vec<Type<V>>,
    },

    /// Type abstraction at a polymorphic definition; `vars` is non-empty
    TyAbs {
        vars: Vec<V>,
        body: Rc<TypedTerm<V>>,
    },
}
