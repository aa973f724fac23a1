//! bscript_emitter: Bytecode artifacts and their on-disk forms.
//!
//! Turns a [`ResolvedScript`](bscript_ast::ResolvedScript) into a
//! [`BytecodeArtifact`], encodes it into the `BSBC` binary format or a text
//! assembly listing, and writes both into an output tree.

pub mod artifact;
pub mod assembly;
pub mod binary;
pub mod writer;

pub use artifact::{emit, BytecodeArtifact, Operand, Record, StringIndex};
pub use binary::{DecodeError, FORMAT_VERSION, MAGIC};
pub use writer::{write_artifact, ASSEMBLY_EXTENSION, BYTECODE_EXTENSION};
