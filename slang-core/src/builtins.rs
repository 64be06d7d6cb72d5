//! Names the language knows without any declaration: the primitive types
//! and the reserved statement words.

/// Built-in primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
}

/// Metadata about a single primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveDescriptor {
    /// Name of the type at the source level.
    pub name: &'static str,
    pub primitive: Primitive,
    /// Storage width in bits; zero for Void.
    pub bits: u32,
    /// Whether decimal literals can be read as this type.
    pub integer_literal: bool,
    /// Whether `true` / `false` can be read as this type.
    pub boolean_literal: bool,
}

/// The complete primitive catalogue.
///
/// The search is linear because the table is tiny.
pub const PRIMITIVES: &[PrimitiveDescriptor] = &[
    PrimitiveDescriptor {
        name: "Void",
        primitive: Primitive::Void,
        bits: 0,
        integer_literal: false,
        boolean_literal: false,
    },
    PrimitiveDescriptor {
        name: "Bool",
        primitive: Primitive::Bool,
        bits: 1,
        integer_literal: false,
        boolean_literal: true,
    },
    PrimitiveDescriptor {
        name: "Int8",
        primitive: Primitive::Int8,
        bits: 8,
        integer_literal: true,
        boolean_literal: false,
    },
    PrimitiveDescriptor {
        name: "Int16",
        primitive: Primitive::Int16,
        bits: 16,
        integer_literal: true,
        boolean_literal: false,
    },
    PrimitiveDescriptor {
        name: "Int32",
        primitive: Primitive::Int32,
        bits: 32,
        integer_literal: true,
        boolean_literal: false,
    },
    PrimitiveDescriptor {
        name: "Int64",
        primitive: Primitive::Int64,
        bits: 64,
        integer_literal: true,
        boolean_literal: false,
    },
];

pub fn find_primitive(name: &str) -> Option<&'static PrimitiveDescriptor> {
    PRIMITIVES.iter().find(|descriptor| descriptor.name == name)
}

impl Primitive {
    pub fn descriptor(self) -> &'static PrimitiveDescriptor {
        let index = match self {
            Primitive::Void => 0,
            Primitive::Bool => 1,
            Primitive::Int8 => 2,
            Primitive::Int16 => 3,
            Primitive::Int32 => 4,
            Primitive::Int64 => 5,
        };
        &PRIMITIVES[index]
    }
}

/// Statement words handled by the compiler itself; they are matched before
/// any symbol lookup and cannot be shadowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedWord {
    If,
    Return,
}

impl ReservedWord {
    pub fn from_word(word: &str) -> Option<ReservedWord> {
        match word {
            "if" => Some(ReservedWord::If),
            "return" => Some(ReservedWord::Return),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservedWord::If => "if",
            ReservedWord::Return => "return",
        }
    }
}
