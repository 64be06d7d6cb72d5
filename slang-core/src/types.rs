//! Type model for SLang.
//!
//! A type is either one of the fixed primitives or a user-declared
//! aggregate. Aggregates come in two flavours that share a layout but not
//! semantics: a `struct` is a value that is copied on every pass and
//! assignment, a `model` is always handled through its address.

use std::fmt;
use std::rc::Rc;

use crate::backend::IrType;
use crate::builtins::{Primitive, find_primitive};
use crate::error::{CompileError, CompileResult};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Struct,
    Model,
}

impl AggregateKind {
    pub fn from_keyword(word: &str) -> Option<AggregateKind> {
        match word {
            "struct" => Some(AggregateKind::Struct),
            "model" => Some(AggregateKind::Model),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            AggregateKind::Struct => "struct",
            AggregateKind::Model => "model",
        }
    }
}

/// A declared struct or model with its ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub name: String,
    pub kind: AggregateKind,
    pub fields: Vec<(String, Type)>,
}

impl Aggregate {
    /// Positional index of `member`, which is also its layout slot.
    pub fn field_index(&self, member: &str) -> Option<usize> {
        self.fields.iter().position(|(name, _)| name == member)
    }

    pub fn field(&self, member: &str) -> Option<(usize, &Type)> {
        let index = self.field_index(member)?;
        Some((index, &self.fields[index].1))
    }
}

/// How values of a type travel between bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passing {
    /// Copied: primitives and structs.
    ByValue,
    /// Shared through an address: models.
    ByAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Primitive(Primitive),
    Aggregate(Rc<Aggregate>),
}

impl Type {
    pub fn name(&self) -> &str {
        match self {
            Type::Primitive(primitive) => primitive.descriptor().name,
            Type::Aggregate(aggregate) => &aggregate.name,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Void))
    }

    /// Whether `+` and `-` apply.
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive(primitive) if primitive.descriptor().integer_literal)
    }

    pub fn aggregate(&self) -> Option<&Aggregate> {
        match self {
            Type::Aggregate(aggregate) => Some(aggregate),
            Type::Primitive(_) => None,
        }
    }

    pub fn passing(&self) -> Passing {
        match self {
            Type::Aggregate(aggregate) if aggregate.kind == AggregateKind::Model => {
                Passing::ByAddress
            }
            _ => Passing::ByValue,
        }
    }

    /// The named layout of an aggregate, or the plain integer of a primitive.
    pub fn layout_type(&self) -> IrType {
        match self {
            Type::Primitive(Primitive::Void) => IrType::Void,
            Type::Primitive(primitive) => IrType::Int(primitive.descriptor().bits),
            Type::Aggregate(aggregate) => IrType::Struct(aggregate.name.clone()),
        }
    }

    /// Representation of a value of this type in IR: models are pointers to
    /// their layout.
    pub fn ir_type(&self) -> IrType {
        match self.passing() {
            Passing::ByValue => self.layout_type(),
            Passing::ByAddress => self.layout_type().pointer_to(),
        }
    }

    /// Fails unless values of this type can be stored in a binding or field.
    pub fn require_storable(&self, binding: &str) -> CompileResult<()> {
        if self.is_void() {
            return Err(CompileError::InvalidMember(binding.to_string()));
        }
        Ok(())
    }

    /// Reads `literal` as a constant of this type, if it is one.
    ///
    /// Integers are decimal and must start with a digit; a value that does
    /// not fit the width is not a literal.
    pub fn make_value(&self, literal: &str) -> Option<i64> {
        let Type::Primitive(primitive) = self else {
            return None;
        };
        let descriptor = primitive.descriptor();

        if descriptor.boolean_literal {
            return match literal {
                "true" => Some(1),
                "false" => Some(0),
                _ => None,
            };
        }
        if !descriptor.integer_literal || !literal.as_bytes().first()?.is_ascii_digit() {
            return None;
        }
        match primitive {
            Primitive::Int8 => literal.parse::<i8>().ok().map(i64::from),
            Primitive::Int16 => literal.parse::<i16>().ok().map(i64::from),
            Primitive::Int32 => literal.parse::<i32>().ok().map(i64::from),
            Primitive::Int64 => literal.parse::<i64>().ok(),
            Primitive::Void | Primitive::Bool => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether `word` is spelled like a literal of some primitive type.
pub fn looks_like_literal(word: &str) -> bool {
    word.as_bytes().first().is_some_and(u8::is_ascii_digit) || word == "true" || word == "false"
}

/// Looks `name` up among declared types first, then among primitives.
pub fn resolve(name: &str, types: &Registry<Type>) -> CompileResult<Type> {
    if let Some(ty) = types.get(name) {
        return Ok(ty.clone());
    }
    find_primitive(name)
        .map(|descriptor| Type::Primitive(descriptor.primitive))
        .ok_or_else(|| CompileError::UnknownType(name.to_string()))
}
