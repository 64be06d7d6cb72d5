//! Core compiler for the SLang language.
//!
//! The pipeline is roughly:
//!
//!   source .sl
//!     -> lexer      (byte cursor, bare words)
//!     -> parser     (declaration / statement / value heads)
//!     -> compiler   (phase 1: declarations, phase 2: bodies via statements)
//!     -> backend    (ir::Builder, verified)
//!     -> codegen_wasm (wasm-encoder) / codegen_llvm (text)
//!
//! There is no syntax tree: function bodies are compiled straight from the
//! source bytes. Higher-level tools (the CLI) should depend on this crate
//! rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------

pub mod error;

// ---------------------------------------------------------------------
// Front-end: scanning and grammar decisions
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic layers: types, registries, scopes
// ---------------------------------------------------------------------

pub mod builtins;
pub mod types;
pub mod registry;
pub mod scope;

// ---------------------------------------------------------------------
// Code generation port and IR
// ---------------------------------------------------------------------

pub mod backend;
pub mod ir;

// ---------------------------------------------------------------------
// Compiler orchestration and output
// ---------------------------------------------------------------------

pub mod statements;
pub mod compiler;
pub mod codegen_wasm;
pub mod codegen_llvm;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{
    CompilationArtifact, CompileOptions, Project, SourceUnit, compile_wasm, emit_llvm_ir,
};
pub use error::{CompileError, CoreError};
