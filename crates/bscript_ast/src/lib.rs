//! bscript_ast: Syntax trees and resolved forms of bscript modules.
//!
//! A module goes through three shapes: the [`ScriptTree`] produced by the
//! parser (identifiers interned in the file's string pool), the
//! [`ModuleExports`] summary published for other modules, and the
//! [`ResolvedScript`] handed to the emitter.

pub mod exports;
pub mod name;
pub mod resolved;
pub mod tree;

pub use exports::{ExportKind, ExportedType, ModuleExports};
pub use name::QualifiedName;
pub use resolved::{Builtin, ResolvedConst, ResolvedField, ResolvedScript, ResolvedType, TypeRef, TypeShape};
pub use tree::{Declaration, DeclarationKind, Field, Ident, Path, ScriptTree};
