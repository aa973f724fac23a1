//! What a module publishes to the modules that depend on it.

use indexmap::{IndexMap, IndexSet};

use crate::name::QualifiedName;
use crate::resolved::TypeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Struct,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedType {
    pub kind: ExportKind,
    /// Field names for structs, variant names for enums, in declaration order.
    pub members: IndexSet<String>,
}

impl ExportedType {
    /// Declaration-order position of `member`.
    pub fn ordinal(&self, member: &str) -> Option<u32> {
        self.members.get_index_of(member).map(|index| index as u32)
    }
}

/// The declared types of a module, available once its pre-semantic stage has
/// run. Owned data only, so it outlives the module's arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleExports {
    pub module: QualifiedName,
    pub types: IndexMap<String, ExportedType>,
}

impl ModuleExports {
    pub fn new(module: QualifiedName) -> Self {
        Self {
            module,
            types: IndexMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExportedType> {
        self.types.get(name)
    }

    /// A reference to the exported type `name`.
    pub fn type_ref(&self, name: &str) -> TypeRef {
        TypeRef::Named {
            module: self.module.to_string(),
            qualified: self.module.sibling(name).to_string(),
        }
    }

    /// The types other than the module's primary type.
    pub fn secondary_types(&self) -> impl Iterator<Item = &str> {
        let primary = self.module.name();
        self.types
            .keys()
            .map(String::as_str)
            .filter(move |name| *name != primary)
    }
}
