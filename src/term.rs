//! Untyped intermediate representation accepted by the inference engine
//!
//! Terms arrive from an earlier lowering pass with local variables already
//! resolved to de Bruijn indices into the binder stack. Builtins are bare
//! tags; their type signatures are supplied separately (see
//! [`crate::builtins`]).

use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{NamedDeBruijn, Prim, Type};

pub type Ident = String;

/// Source location for error reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A spanned node
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// How a variable occurrence refers to its binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Name {
    /// Locally bound: a de Bruijn index into the binder stack, 0 being the
    /// innermost binder. The name is for display only.
    Local { name: Ident, index: usize },
    /// A module-level reference; resolution happens outside this engine.
    Global(Ident),
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Local { name, .. } => write!(f, "{}", name),
            Name::Global(name) => write!(f, "{}", name),
        }
    }
}

/// Literal constants
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Decimal(Decimal),
    Bool(bool),
    Str(String),
    Unit,
    Time(DateTime<Utc>),
    /// A named guard value; the payload is opaque to inference.
    Guard(String),
}

impl Literal {
    /// The primitive type of this literal.
    pub fn prim(&self) -> Prim {
        match self {
            Literal::Int(_) => Prim::Int,
            Literal::Decimal(_) => Prim::Decimal,
            Literal::Bool(_) => Prim::Bool,
            Literal::Str(_) => Prim::String,
            Literal::Unit => Prim::Unit,
            Literal::Time(_) => Prim::Time,
            Literal::Guard(_) => Prim::Guard,
        }
    }
}

/// A lambda or let parameter. The annotation is whatever the surface syntax
/// carried; this pass ignores it and assigns a fresh inference variable.
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: Ident,
    pub ann: Option<Type<NamedDeBruijn>>,
    pub span: Span,
}

impl Arg {
    pub fn new(name: impl Into<Ident>) -> Arg {
        Arg {
            name: name.into(),
            ann: None,
            span: Span::default(),
        }
    }
}

/// Tags identifying builtin operations. Only the *signature* of a builtin is
/// known to this engine; implementations live downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTag {
    // Integer arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Negate,
    Abs,
    BitAnd,
    BitOr,
    BitXor,
    BitFlip,
    Shift,
    // Decimal arithmetic
    DecAdd,
    DecSub,
    DecMul,
    DecDiv,
    DecNegate,
    DecAbs,
    Round,
    Ceiling,
    Floor,
    // Integer comparison
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    // Booleans
    Not,
    And,
    Or,
    // Lists
    Map,
    Fold,
    Filter,
    ZipWith,
    If,
    Take,
    Drop,
    Length,
    Reverse,
    Head,
    Distinct,
    Contains,
    Enumerate,
    EnumerateStep,
    // Strings
    IntToStr,
    StrToInt,
    Concat,
    StrLength,
    Format,
    Hash,
    // Guards and capabilities
    Enforce,
    EnforceGuard,
    RequireCap,
    ComposeCap,
    // Tables
    ReadRow,
    WriteRow,
    Keys,
    // Time
    ParseTime,
    AddTime,
    Days,
    Hours,
    Minutes,
    /// Field access on a record. There is no one signature for every field,
    /// so the core table leaves this unmapped; the lowering that knows the
    /// concrete field supplies a signature of the shape
    /// `forall a r. {field: a | r} -> a`.
    ReadField,
}

impl BuiltinTag {
    /// Every tag, for table-totality checks.
    pub const ALL: &'static [BuiltinTag] = &[
        BuiltinTag::Add,
        BuiltinTag::Sub,
        BuiltinTag::Mul,
        BuiltinTag::Div,
        BuiltinTag::Mod,
        BuiltinTag::Pow,
        BuiltinTag::Negate,
        BuiltinTag::Abs,
        BuiltinTag::BitAnd,
        BuiltinTag::BitOr,
        BuiltinTag::BitXor,
        BuiltinTag::BitFlip,
        BuiltinTag::Shift,
        BuiltinTag::DecAdd,
        BuiltinTag::DecSub,
        BuiltinTag::DecMul,
        BuiltinTag::DecDiv,
        BuiltinTag::DecNegate,
        BuiltinTag::DecAbs,
        BuiltinTag::Round,
        BuiltinTag::Ceiling,
        BuiltinTag::Floor,
        BuiltinTag::Eq,
        BuiltinTag::Neq,
        BuiltinTag::Lt,
        BuiltinTag::Leq,
        BuiltinTag::Gt,
        BuiltinTag::Geq,
        BuiltinTag::Not,
        BuiltinTag::And,
        BuiltinTag::Or,
        BuiltinTag::Map,
        BuiltinTag::Fold,
        BuiltinTag::Filter,
        BuiltinTag::ZipWith,
        BuiltinTag::If,
        BuiltinTag::Take,
        BuiltinTag::Drop,
        BuiltinTag::Length,
        BuiltinTag::Reverse,
        BuiltinTag::Head,
        BuiltinTag::Distinct,
        BuiltinTag::Contains,
        BuiltinTag::Enumerate,
        BuiltinTag::EnumerateStep,
        BuiltinTag::IntToStr,
        BuiltinTag::StrToInt,
        BuiltinTag::Concat,
        BuiltinTag::StrLength,
        BuiltinTag::Format,
        BuiltinTag::Hash,
        BuiltinTag::Enforce,
        BuiltinTag::EnforceGuard,
        BuiltinTag::RequireCap,
        BuiltinTag::ComposeCap,
        BuiltinTag::ReadRow,
        BuiltinTag::WriteRow,
        BuiltinTag::Keys,
        BuiltinTag::ParseTime,
        BuiltinTag::AddTime,
        BuiltinTag::Days,
        BuiltinTag::Hours,
        BuiltinTag::Minutes,
        BuiltinTag::ReadField,
    ];
}

impl fmt::Display for BuiltinTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuiltinTag::Add => "+",
            BuiltinTag::Sub => "-",
            BuiltinTag::Mul => "*",
            BuiltinTag::Div => "/",
            BuiltinTag::Mod => "mod",
            BuiltinTag::Pow => "^",
            BuiltinTag::Negate => "negate",
            BuiltinTag::Abs => "abs",
            BuiltinTag::BitAnd => "&",
            BuiltinTag::BitOr => "|",
            BuiltinTag::BitXor => "xor",
            BuiltinTag::BitFlip => "~",
            BuiltinTag::Shift => "shift",
            BuiltinTag::DecAdd => "dec-add",
            BuiltinTag::DecSub => "dec-sub",
            BuiltinTag::DecMul => "dec-mul",
            BuiltinTag::DecDiv => "dec-div",
            BuiltinTag::DecNegate => "dec-negate",
            BuiltinTag::DecAbs => "dec-abs",
            BuiltinTag::Round => "round",
            BuiltinTag::Ceiling => "ceiling",
            BuiltinTag::Floor => "floor",
            BuiltinTag::Eq => "=",
            BuiltinTag::Neq => "!=",
            BuiltinTag::Lt => "<",
            BuiltinTag::Leq => "<=",
            BuiltinTag::Gt => ">",
            BuiltinTag::Geq => ">=",
            BuiltinTag::Not => "not",
            BuiltinTag::And => "and",
            BuiltinTag::Or => "or",
            BuiltinTag::Map => "map",
            BuiltinTag::Fold => "fold",
            BuiltinTag::Filter => "filter",
            BuiltinTag::ZipWith => "zip-with",
            BuiltinTag::If => "if",
            BuiltinTag::Take => "take",
            BuiltinTag::Drop => "drop",
            BuiltinTag::Length => "length",
            BuiltinTag::Reverse => "reverse",
            BuiltinTag::Head => "head",
            BuiltinTag::Distinct => "distinct",
            BuiltinTag::Contains => "contains",
            BuiltinTag::Enumerate => "enumerate",
            BuiltinTag::EnumerateStep => "enumerate-step",
            BuiltinTag::IntToStr => "int-to-str",
            BuiltinTag::StrToInt => "str-to-int",
            BuiltinTag::Concat => "concat",
            BuiltinTag::StrLength => "str-length",
            BuiltinTag::Format => "format",
            BuiltinTag::Hash => "hash",
            BuiltinTag::Enforce => "enforce",
            BuiltinTag::EnforceGuard => "enforce-guard",
            BuiltinTag::RequireCap => "require-capability",
            BuiltinTag::ComposeCap => "compose-capability",
            BuiltinTag::ReadRow => "read",
            BuiltinTag::WriteRow => "write",
            BuiltinTag::Keys => "keys",
            BuiltinTag::ParseTime => "parse-time",
            BuiltinTag::AddTime => "add-time",
            BuiltinTag::Days => "days",
            BuiltinTag::Hours => "hours",
            BuiltinTag::Minutes => "minutes",
            BuiltinTag::ReadField => "read-field",
        };
        write!(f, "{}", name)
    }
}

/// An untyped term
pub type Term = Spanned<TermKind>;

#[derive(Debug, Clone)]
pub enum TermKind {
    /// Variable occurrence
    Var(Name),

    /// Lambda: the name identifies the abstraction for diagnostics
    Lam {
        name: Ident,
        params: Vec<Arg>,
        body: Rc<Term>,
    },

    /// Application to one or more arguments (in source order)
    App { func: Rc<Term>, args: Vec<Term> },

    /// Let binding; the annotation, if present, is ignored by this pass
    Let {
        name: Ident,
        ann: Option<Type<NamedDeBruijn>>,
        value: Rc<Term>,
        body: Rc<Term>,
    },

    /// A sequence of terms; the block's value is its last term's value
    Block(Vec<Term>),

    /// A term that raises at runtime; it takes on any required type
    Error(String),

    /// Builtin operation
    Builtin(BuiltinTag),

    /// Dynamic member access; not supported by this engine
    DynAccess { object: Rc<Term>, field: Ident },

    /// Literal constant
    Constant(Literal),

    /// Object literal; fields keep their source order
    ObjectLit(Vec<(Ident, Term)>),

    /// List literal
    ListLit(Vec<Term>),
}
