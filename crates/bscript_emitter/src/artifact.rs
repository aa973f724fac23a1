//! In-memory bytecode for one module.

use bscript_ast::{Builtin, ResolvedScript, TypeRef, TypeShape};
use indexmap::IndexSet;

/// Index into [`BytecodeArtifact::strings`].
pub type StringIndex = u32;

/// A type operand: a builtin or the qualified name of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Builtin(Builtin),
    Named(StringIndex),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Struct {
        name: StringIndex,
        fields: Vec<(StringIndex, Operand)>,
    },
    Enum {
        name: StringIndex,
        variants: Vec<StringIndex>,
    },
    Const {
        name: StringIndex,
        ty: Operand,
        ordinal: u32,
    },
}

impl Record {
    pub fn name(&self) -> StringIndex {
        match self {
            Record::Struct { name, .. } | Record::Enum { name, .. } | Record::Const { name, .. } => *name,
        }
    }
}

/// The compiled form of one module. Every name is stored once in the string
/// table and referenced by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeArtifact {
    /// String index of the module's qualified name.
    pub module: StringIndex,
    pub strings: Vec<String>,
    pub records: Vec<Record>,
}

impl BytecodeArtifact {
    pub fn string(&self, index: StringIndex) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn module_name(&self) -> &str {
        self.string(self.module).unwrap_or_default()
    }

    /// Render an operand as source text.
    pub fn operand_text(&self, operand: Operand) -> &str {
        match operand {
            Operand::Builtin(builtin) => builtin.name(),
            Operand::Named(index) => self.string(index).unwrap_or("?"),
        }
    }
}

/// Builds the deduplicated string table while records are emitted.
#[derive(Default)]
struct StringTable {
    strings: IndexSet<String>,
}

impl StringTable {
    fn add(&mut self, text: &str) -> StringIndex {
        if let Some(index) = self.strings.get_index_of(text) {
            return index as StringIndex;
        }
        self.strings.insert_full(text.to_string()).0 as StringIndex
    }

    fn operand(&mut self, ty: &TypeRef) -> Operand {
        match ty {
            TypeRef::Builtin(builtin) => Operand::Builtin(*builtin),
            TypeRef::Named { qualified, .. } => Operand::Named(self.add(qualified)),
        }
    }
}

/// Lower a resolved module into bytecode. Types come first in declaration
/// order, followed by constants.
pub fn emit(script: &ResolvedScript) -> BytecodeArtifact {
    let mut table = StringTable::default();
    let module = table.add(&script.module.to_string());

    let mut records = Vec::with_capacity(script.types.len() + script.constants.len());
    for ty in &script.types {
        let name = table.add(&ty.name);
        let record = match &ty.shape {
            TypeShape::Struct(fields) => Record::Struct {
                name,
                fields: fields
                    .iter()
                    .map(|field| (table.add(&field.name), table.operand(&field.ty)))
                    .collect(),
            },
            TypeShape::Enum(variants) => Record::Enum {
                name,
                variants: variants.iter().map(|variant| table.add(variant)).collect(),
            },
        };
        records.push(record);
    }
    for constant in &script.constants {
        records.push(Record::Const {
            name: table.add(&constant.name),
            ty: table.operand(&constant.ty),
            ordinal: constant.ordinal,
        });
    }

    BytecodeArtifact {
        module,
        strings: table.strings.into_iter().collect(),
        records,
    }
}
