//! The IR emission port.
//!
//! The compiler never talks to a concrete code generator directly. It drives
//! a [`Backend`], which only has to offer the handful of capabilities below.
//! [`crate::ir::Builder`] is the in-tree implementation; anything else that
//! can build functions, stack slots, loads, stores, calls and returns can be
//! swapped in without touching the compiler.

use std::fmt;

use thiserror::Error;

/// Backend-neutral IR types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    /// Integer of the given bit width; `Int(1)` is a boolean.
    Int(u32),
    Ptr(Box<IrType>),
    /// Named structure type, declared with [`Backend::declare_struct`].
    Struct(String),
}

impl IrType {
    pub fn pointer_to(self) -> IrType {
        IrType::Ptr(Box::new(self))
    }

    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => f.write_str("void"),
            IrType::Int(bits) => write!(f, "i{bits}"),
            IrType::Ptr(inner) => write!(f, "{inner}*"),
            IrType::Struct(name) => write!(f, "%{name}"),
        }
    }
}

/// A malformed module, reported by [`Backend::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", location(.function))]
pub struct BackendError {
    pub function: Option<String>,
    pub message: String,
}

fn location(function: &Option<String>) -> String {
    match function {
        Some(name) => format!("in `{name}`: "),
        None => String::new(),
    }
}

impl BackendError {
    pub fn module(message: impl Into<String>) -> Self {
        BackendError {
            function: None,
            message: message.into(),
        }
    }

    pub fn in_function(function: &str, message: impl Into<String>) -> Self {
        BackendError {
            function: Some(function.to_string()),
            message: message.into(),
        }
    }
}

/// Capability set the compiler needs from its code generator.
pub trait Backend {
    /// An SSA value, constant, parameter or address.
    type Value: Clone + fmt::Debug;
    /// Handle to a declared function.
    type Function: Clone + fmt::Debug;
    /// Snapshot of everything declared so far.
    type Checkpoint;

    fn checkpoint(&self) -> Self::Checkpoint;

    /// Discards every structure, global and function declared after
    /// `checkpoint` was taken, along with any recorded misuse.
    fn rollback(&mut self, checkpoint: Self::Checkpoint);

    /// Declares a named structure layout with ordered field types.
    fn declare_struct(&mut self, name: &str, fields: &[IrType]);

    fn declare_function(&mut self, name: &str, params: &[IrType], ret: &IrType)
    -> Self::Function;

    /// Opens the entry block of `function` and positions the builder at its end.
    fn append_entry_block(&mut self, function: &Self::Function);

    fn param(&self, function: &Self::Function, index: usize) -> Self::Value;

    fn const_int(&mut self, ty: &IrType, value: i64) -> Self::Value;

    /// Allocates stack storage for one value of `ty`; returns its address.
    fn build_alloca(&mut self, ty: &IrType, name: Option<&str>) -> Self::Value;

    /// Allocates storage for `ty` that outlives the current function; returns
    /// its address. Never freed.
    fn build_heap_alloc(&mut self, ty: &IrType) -> Self::Value;

    fn build_store(&mut self, value: Self::Value, ptr: Self::Value);

    fn build_load(&mut self, ptr: Self::Value) -> Self::Value;

    fn build_call(&mut self, function: &Self::Function, args: Vec<Self::Value>) -> Self::Value;

    fn build_add(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;

    fn build_sub(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;

    /// Address of field `index` of the structure stored at `ptr`.
    fn build_struct_gep(&mut self, ptr: Self::Value, index: usize) -> Self::Value;

    /// A structure value from ordered field values. Constant when every field
    /// is constant.
    fn build_struct(&mut self, ty: &IrType, fields: Vec<Self::Value>) -> Self::Value;

    /// Adds a global initialized with a constant; returns its address.
    fn add_global(&mut self, name: &str, initializer: Self::Value) -> Self::Value;

    fn build_ret_void(&mut self);

    fn build_ret(&mut self, value: Self::Value);

    fn verify(&self) -> Result<(), BackendError>;
}
