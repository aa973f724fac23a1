//! The collaborators the pipeline stages call into.
//!
//! Each stage talks to its collaborator through a trait so sessions can swap
//! in instrumented or alternative implementations. [`Toolchain::default`]
//! wires up the reference parser, resolver, emitter and writer.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bscript_ast::{ModuleExports, QualifiedName, ResolvedScript, ScriptTree};
use bscript_core::StringPool;
use bscript_diagnostics::{FatalError, Reporter};
use bscript_emitter::BytecodeArtifact;

use crate::semantic::ReferenceResolver;

/// Turns file bytes into a [`ScriptTree`].
pub trait ScriptParser: Send + Sync {
    /// Returns `Ok(None)` when the bytes are not source text at all. Syntax
    /// errors are reported through `reporter`.
    fn parse(&self, source: &[u8], strings: &mut StringPool, reporter: &Reporter)
        -> Result<Option<ScriptTree>, FatalError>;
}

/// Answers "which module declares this path?" for the resolver.
pub trait TypeLookup {
    /// Look up a `:`-separated path from the resolving module's namespace.
    /// May drive the declaring module's pipeline on the calling thread.
    fn lookup(&self, path: &str) -> Result<Lookup, FatalError>;
}

#[derive(Debug, Clone)]
pub enum Lookup {
    /// The path names `type_name` (and possibly one of its members) in a
    /// module that resolved successfully.
    Found {
        exports: Arc<ModuleExports>,
        type_name: String,
        member: Option<String>,
    },
    /// The path names a type declared by a module that failed to compile.
    Failed { module: String },
    Missing,
}

/// Declaration and reference resolution.
pub trait ScriptResolver: Send + Sync {
    /// Collect the types a module declares, reporting purely local problems.
    fn declare(&self, module: &QualifiedName, tree: &ScriptTree, strings: &StringPool, reporter: &Reporter)
        -> ModuleExports;

    /// Bind every reference in `tree`.
    fn resolve(
        &self,
        exports: &ModuleExports,
        tree: &ScriptTree,
        strings: &StringPool,
        lookup: &dyn TypeLookup,
        reporter: &Reporter,
    ) -> Result<ResolvedScript, FatalError>;
}

/// Lowers a resolved module to bytecode.
pub trait ScriptEmitter: Send + Sync {
    fn emit(&self, script: &ResolvedScript) -> BytecodeArtifact;
}

/// Persists an artifact below an output directory.
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, artifact: &BytecodeArtifact, out_dir: &Path, emit_assembly: bool) -> io::Result<PathBuf>;
}

#[derive(Clone)]
pub struct Toolchain {
    pub parser: Arc<dyn ScriptParser>,
    pub resolver: Arc<dyn ScriptResolver>,
    pub emitter: Arc<dyn ScriptEmitter>,
    pub writer: Arc<dyn ArtifactWriter>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            parser: Arc::new(SourceParser),
            resolver: Arc::new(ReferenceResolver),
            emitter: Arc::new(BytecodeEmitter),
            writer: Arc::new(FileWriter),
        }
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}

/// [`bscript_parser`] as a [`ScriptParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceParser;

impl ScriptParser for SourceParser {
    fn parse(&self, source: &[u8], strings: &mut StringPool, reporter: &Reporter)
        -> Result<Option<ScriptTree>, FatalError> {
        bscript_parser::parse_source(source, strings, reporter)
    }
}

/// [`bscript_emitter::emit`] as a [`ScriptEmitter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BytecodeEmitter;

impl ScriptEmitter for BytecodeEmitter {
    fn emit(&self, script: &ResolvedScript) -> BytecodeArtifact {
        bscript_emitter::emit(script)
    }
}

/// Writes `.bsc` files (and `.bsa` listings) to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriter;

impl ArtifactWriter for FileWriter {
    fn write(&self, artifact: &BytecodeArtifact, out_dir: &Path, emit_assembly: bool) -> io::Result<PathBuf> {
        bscript_emitter::write_artifact(artifact, out_dir, emit_assembly)
    }
}
