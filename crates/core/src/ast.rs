//! The abstract syntax tree handed to the code generator.
//!
//! This is a closed set of node kinds; the generator matches exhaustively,
//! so adding a variant fails the build until every walk handles it.

use crate::span::{Span, Spanned};

/// An identifier with the span it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub procedures: Vec<Procedure>,
    pub main: Main,
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: Name,
    pub params: Vec<Param>,
    pub declarations: Vec<Spanned<Declaration>>,
    pub commands: Vec<Spanned<Command>>,
}

#[derive(Debug, Clone)]
pub struct Main {
    pub declarations: Vec<Spanned<Declaration>>,
    pub commands: Vec<Spanned<Command>>,
}

/// Parameter kinds as declared in a procedure head.
///
/// Every parameter is a by-reference cell at run time; `ValueIn` and
/// `ValueOut` only document intent and are treated identically. The grammar
/// produces `ValueIn` for bare scalars and `Array` for `T`-marked names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    ValueIn,
    ValueOut,
    Array,
}

impl ParamKind {
    pub fn is_array(self) -> bool {
        matches!(self, ParamKind::Array)
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub kind: ParamKind,
    pub name: Name,
}

#[derive(Debug, Clone)]
pub enum Declaration {
    Var(Name),
    Array { name: Name, start: u64, end: u64 },
}

/// Assignment/read target: a scalar variable or one array element.
#[derive(Debug, Clone)]
pub enum Ident {
    Var(Name),
    Indexed(Name, Expr),
}

impl Ident {
    pub fn name(&self) -> &Name {
        match self {
            Ident::Var(name) => name,
            Ident::Indexed(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForDirection {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub enum Command {
    Assign {
        target: Ident,
        value: Expr,
    },
    If {
        condition: Condition,
        then_branch: Vec<Spanned<Command>>,
        /// Empty when the `ELSE` arm is absent.
        else_branch: Vec<Spanned<Command>>,
    },
    While {
        condition: Condition,
        body: Vec<Spanned<Command>>,
    },
    Repeat {
        body: Vec<Spanned<Command>>,
        condition: Condition,
    },
    For {
        iterator: Name,
        from: Expr,
        to: Expr,
        direction: ForDirection,
        body: Vec<Spanned<Command>>,
    },
    Call {
        name: Name,
        args: Vec<Expr>,
    },
    Read {
        target: Ident,
    },
    Write {
        value: Expr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(u64),
    Variable(Name),
    ArrayRef(Name, Box<Expr>),
    BinOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Relational expression; appears only under `IF`/`WHILE`/`REPEAT`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub left: Expr,
    pub op: RelOp,
    pub right: Expr,
}
