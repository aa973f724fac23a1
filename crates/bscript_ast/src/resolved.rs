//! The resolved form of a module, with every type reference bound.

use std::collections::BTreeSet;
use std::fmt;

use crate::name::QualifiedName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Int,
    Float,
    Bool,
    String,
}

impl Builtin {
    pub const ALL: [Builtin; 4] = [Builtin::Int, Builtin::Float, Builtin::Bool, Builtin::String];

    pub fn from_name(name: &str) -> Option<Builtin> {
        match name {
            "int" => Some(Builtin::Int),
            "float" => Some(Builtin::Float),
            "bool" => Some(Builtin::Bool),
            "string" => Some(Builtin::String),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::String => "string",
        }
    }

    /// Operand code used by the bytecode format.
    pub fn code(self) -> u8 {
        match self {
            Builtin::Int => 1,
            Builtin::Float => 2,
            Builtin::Bool => 3,
            Builtin::String => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|builtin| builtin.code() == code)
    }
}

/// A bound type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Builtin(Builtin),
    /// A declared type: the module that declares it and the type's own
    /// qualified name (its namespace is the module's namespace).
    Named { module: String, qualified: String },
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Builtin(builtin) => f.write_str(builtin.name()),
            TypeRef::Named { qualified, .. } => f.write_str(qualified),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeShape {
    Struct(Vec<ResolvedField>),
    Enum(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub name: String,
    pub shape: TypeShape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConst {
    pub name: String,
    pub ty: TypeRef,
    pub variant: String,
    pub ordinal: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScript {
    pub module: QualifiedName,
    pub types: Vec<ResolvedType>,
    pub constants: Vec<ResolvedConst>,
    /// Other modules this one refers to.
    pub dependencies: BTreeSet<String>,
}

impl ResolvedScript {
    pub fn new(module: QualifiedName) -> Self {
        Self {
            module,
            types: Vec::new(),
            constants: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn find_type(&self, name: &str) -> Option<&ResolvedType> {
        self.types.iter().find(|ty| ty.name == name)
    }
}
