use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Everything that can go wrong while scanning or compiling a source unit.
///
/// The taxonomy is flat on purpose: the first error aborts the unit, and the
/// caller receives exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("source file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown statement `{0}`")]
    UnknownStatement(String),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown operation `{0}`")]
    UnknownOperation(char),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("missing type for declaration of `{0}`")]
    MissingTypeForDeclaration(String),
    #[error("missing comma after argument")]
    MissingCommaAfterArguments,
    #[error("missing `->` and return type")]
    MissingReturnType,
    #[error("missing `=` assignment")]
    MissingAssignment,
    #[error("expected `{0}`")]
    MissingCharacter(char),
    #[error("invalid type definition for `{0}`, expected `struct` or `model`")]
    InvalidTypeDefinition(String),
    #[error("invalid member `{0}`")]
    InvalidMember(String),
    #[error("too many arguments, expected {expected}")]
    TooManyArguments { expected: usize },
    #[error("too few arguments, expected {expected} but found {found}")]
    TooFewArguments { expected: usize, found: usize },
    #[error("redundant definition of `{0}`")]
    RedundantDefinitionOfGlobal(String),
    #[error("type mismatch, expected `{expected}` but found `{found}`")]
    TypeMismatch { expected: String, found: String },
    #[error("function `{0}` ends without a return statement")]
    MissingReturn(String),
    #[error("`{0}` statements are not supported yet")]
    UnsupportedStatement(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Project-level failure, as seen by embedders.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{unit}: compile error at byte {position}: {error}")]
    Compile {
        unit: String,
        position: usize,
        error: CompileError,
    },
    #[error("module verification failed: {0}")]
    Verify(#[from] BackendError),
    #[error("wasm code generation failed: {0}")]
    Codegen(String),
}

impl CoreError {
    /// The underlying compile error, if this failure came from a source unit.
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            CoreError::Compile { error, .. } => Some(error),
            _ => None,
        }
    }
}
