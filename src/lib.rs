//! Schist - type inference and elaboration for a row-typed functional IR
//!
//! Given an untyped, let-polymorphic term with first-class records and
//! lists, [`run_infer`] produces a most general type scheme and an
//! elaborated term carrying explicit type abstractions and applications,
//! both in closed de Bruijn form. Generalization uses level-tagged
//! unification variables, and record/table types unify through row
//! polymorphism.

pub mod builtins;
pub mod debruijn;
pub mod error;
pub mod infer;
pub mod term;
pub mod test_support;
pub mod typed;
pub mod types;

pub use builtins::Builtins;
pub use error::TypeError;
pub use infer::{run_infer, InferOutput, Inferencer, TypeEnv};
pub use term::{Arg, BuiltinTag, Literal, Name, Span, Spanned, Term, TermKind};
pub use typed::{TypedTerm, TypedTermKind};
pub use types::{NamedDeBruijn, Prim, Row, Tv, TvRef, Type, TypeScheme, Unique};
