//! bscript_compiler: Concurrent orchestration of bscript compilations.
//!
//! A [`Session`] owns one [`CompilationNode`] per source file. Each node runs
//! read, parse, pre-semantic, semantic, code-generate and write as separate
//! jobs on the session's [`JobManager`](bscript_jobs::JobManager). Nodes find
//! each other through the [`NamespaceIndex`]; a node resolving a reference to
//! another module awaits that module's semantic stage, running it inline if
//! no worker has picked it up yet.
//!
//! ```no_run
//! use std::path::Path;
//! use bscript_compiler::{Session, SessionOptions};
//!
//! let mut session = Session::new(SessionOptions::default());
//! session.add_source_directory(Path::new("src"), Path::new("out"))?;
//! let summary = session.drive_all_to_completion()?;
//! assert!(summary.is_success());
//! # Ok::<(), bscript_compiler::SessionError>(())
//! ```

pub mod context;
pub mod namespace;
pub mod node;
pub mod semantic;
pub mod session;
pub mod toolchain;

pub use context::{CompilationContext, SessionOptions};
pub use namespace::{NamespaceHit, NamespaceIndex, RegisterError};
pub use node::{CompilationNode, NodeProgress, NodeSource, Stage, StageJob};
pub use semantic::ReferenceResolver;
pub use session::{discover_sources, module_name, BuildSummary, Session, SessionError, SOURCE_EXTENSION};
pub use toolchain::{
    ArtifactWriter, BytecodeEmitter, FileWriter, Lookup, ScriptEmitter, ScriptParser, ScriptResolver, SourceParser,
    Toolchain, TypeLookup,
};
