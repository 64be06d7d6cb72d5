//! Grammar decisions produced by the parser.
//!
//! There is no syntax tree: these are the small tagged values a parsing
//! function hands back so the caller can decide what to emit. Each one is
//! consumed right away.

use crate::builtins::ReservedWord;
use crate::types::{AggregateKind, Type};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub arguments: Vec<(String, Type)>,
    pub return_type: Type,
}

impl Signature {
    pub fn argument_types(&self) -> Vec<Type> {
        self.arguments.iter().map(|(_, ty)| ty.clone()).collect()
    }
}

/// A top-level declaration, recognized from its header only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Type {
        name: String,
        kind: AggregateKind,
    },
    Global {
        name: String,
        ty: Type,
    },
    Function {
        name: String,
        signature: Signature,
    },
    /// `Owner.name : (instance: Owner) -> ...`. The signature does not
    /// include the self binding.
    InstanceFunction {
        name: String,
        instance: String,
        owner: Type,
        signature: Signature,
    },
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Type { name, .. }
            | Declaration::Global { name, .. }
            | Declaration::Function { name, .. }
            | Declaration::InstanceFunction { name, .. } => name,
        }
    }
}

/// How a statement starts. Delimiters up to and including `(`, `:` or a
/// reassignment's `=` have been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementHead {
    Reserved(ReservedWord),
    /// `name(`
    Call(String),
    /// `target.member(`
    MethodCall { target: String, member: String },
    /// `target.member`, an `=` follows.
    FieldAssign { target: String, member: String },
    /// `name:`
    Declare(String),
    /// `name =`
    Assign(String),
}

/// How a single value inside an expression starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueHead {
    /// A literal or a variable name.
    Plain(String),
    /// `name(`: a structure literal or a function call.
    Call(String),
    Field { target: String, member: String },
    MethodCall { target: String, member: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
}

impl Operator {
    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
        }
    }
}
