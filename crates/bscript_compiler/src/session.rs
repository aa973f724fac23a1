//! The driver: creates nodes, registers their namespaces and drives every
//! node to completion.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bscript_ast::QualifiedName;
use bscript_diagnostics::{messages, DiagnosticSink, FatalError};
use indexmap::IndexMap;

use crate::context::{CompilationContext, SessionOptions};
use crate::node::{CompilationNode, NodeProgress, NodeSource, Stage};
use crate::toolchain::Toolchain;

/// File extension of bscript sources.
pub const SOURCE_EXTENSION: &str = "bs";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot scan '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// What a drive produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub nodes: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Modules that reported errors, in creation order.
    pub failed: Vec<String>,
    /// Bytecode files written, in creation order.
    pub written: Vec<PathBuf>,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

/// One compilation session. Dropping it stops the worker threads.
pub struct Session {
    context: Arc<CompilationContext>,
    nodes: Vec<Arc<CompilationNode>>,
}

impl Session {
    /// A session with the default toolchain, reporting through `tracing`.
    pub fn new(options: SessionOptions) -> Self {
        Self::from_context(CompilationContext::with_options(options))
    }

    pub fn with_toolchain(options: SessionOptions, toolchain: Toolchain, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self::from_context(CompilationContext::new(options, toolchain, sink))
    }

    fn from_context(context: CompilationContext) -> Self {
        Self {
            context: Arc::new(context),
            nodes: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<CompilationContext> {
        &self.context
    }

    pub fn nodes(&self) -> &[Arc<CompilationNode>] {
        &self.nodes
    }

    /// The node compiling `module`, if one was created.
    pub fn node(&self, module: &str) -> Option<&Arc<CompilationNode>> {
        self.nodes.iter().find(|node| node.module().to_string() == module)
    }

    // ========================================================================
    // Node creation
    // ========================================================================

    /// Create a node for the file at `path`, named after its location below
    /// `source_root`, and queue its read stage. The module's primary type is
    /// registered immediately. Nodes without an output directory are compiled
    /// for reference only.
    pub fn create_node(
        &mut self,
        path: &Path,
        source_root: &Path,
        output_dir: Option<&Path>,
    ) -> Result<Arc<CompilationNode>, FatalError> {
        let module = module_name(path, source_root);
        let node = self.spawn(module, path.display().to_string(), NodeSource::File(path.to_path_buf()), output_dir)?;
        self.register_primary(&node);
        Ok(node)
    }

    /// Create a node compiling `text` as the module `module`.
    pub fn create_memory_node(
        &mut self,
        module: QualifiedName,
        text: impl Into<String>,
        output_dir: Option<&Path>,
    ) -> Result<Arc<CompilationNode>, FatalError> {
        let file = module.relative_path(SOURCE_EXTENSION).display().to_string();
        let node = self.spawn(module, file, NodeSource::Memory(text.into()), output_dir)?;
        self.register_primary(&node);
        Ok(node)
    }

    fn spawn(
        &mut self,
        module: QualifiedName,
        file: String,
        source: NodeSource,
        output_dir: Option<&Path>,
    ) -> Result<Arc<CompilationNode>, FatalError> {
        let output = output_dir.map(Path::to_path_buf);
        let node = CompilationNode::new(&self.context, module, file, source, output)?;
        node.queue_stage(Stage::Read)?;
        tracing::trace!(module = %node.module(), file = node.file(), "node created");
        self.nodes.push(Arc::clone(&node));
        Ok(node)
    }

    fn register_primary(&self, node: &Arc<CompilationNode>) {
        let module = node.module();
        let namespace = module.namespace_path();
        if self.context.namespaces.register(&namespace, module.name(), node).is_err() {
            let qualified = module.to_string();
            node.reporter()
                .report(&messages::TYPE_0_IS_ALREADY_DECLARED_BY_ANOTHER_MODULE, None, &[&qualified]);
        }
    }

    /// Register several `(type name, node)` pairs in `namespace`. Names that
    /// are already taken by another node are reported on the rejected node.
    pub fn register_namespace_contents<I>(&self, namespace: &str, contents: I) -> usize
    where
        I: IntoIterator<Item = (String, Arc<CompilationNode>)>,
    {
        let rejected = self.context.namespaces.register_contents(namespace, contents);
        for (node, error) in &rejected {
            tracing::debug!(module = %node.module(), qualified = error.qualified(), "namespace registration rejected");
            node.reporter().report(
                &messages::TYPE_0_IS_ALREADY_DECLARED_BY_ANOTHER_MODULE,
                None,
                &[error.qualified()],
            );
        }
        rejected.len()
    }

    /// Create a node for every source below `dir`, writing bytecode into
    /// `out_dir`. Returns the number of nodes created.
    pub fn add_source_directory(&mut self, dir: &Path, out_dir: &Path) -> Result<usize, SessionError> {
        let sources = discover_sources(dir)?;
        for path in &sources {
            self.create_node(path, dir, Some(out_dir))?;
        }
        tracing::debug!(dir = %dir.display(), count = sources.len(), "added source directory");
        Ok(sources.len())
    }

    /// Compile every source below `dir` for reference only. Their types are
    /// registered namespace by namespace.
    pub fn add_import_directory(&mut self, dir: &Path) -> Result<usize, SessionError> {
        let sources = discover_sources(dir)?;
        let mut namespaces: IndexMap<String, Vec<(String, Arc<CompilationNode>)>> = IndexMap::new();
        for path in &sources {
            let module = module_name(path, dir);
            let node = self.spawn(module, path.display().to_string(), NodeSource::File(path.clone()), None)?;
            namespaces
                .entry(node.module().namespace_path())
                .or_default()
                .push((node.module().name().to_string(), node));
        }
        for (namespace, contents) in namespaces {
            self.register_namespace_contents(&namespace, contents);
        }
        tracing::debug!(dir = %dir.display(), count = sources.len(), "added import directory");
        Ok(sources.len())
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Run every node through all six stages and wait for the session to go
    /// idle.
    ///
    /// Every node finishes its pre-semantic stage before any node starts its
    /// semantic stage, so all types are registered before the first lookup.
    pub fn drive_all_to_completion(&self) -> Result<BuildSummary, FatalError> {
        let _span = tracing::info_span!("drive", nodes = self.nodes.len()).entered();
        for node in &self.nodes {
            node.queue_stage(Stage::PreSemantic)?;
        }
        self.context.jobs.wait_until_idle()?;
        tracing::debug!("declarations registered");

        for node in &self.nodes {
            node.queue_final_stage()?;
        }
        self.context.jobs.wait_until_idle()?;

        let summary = self.summary();
        tracing::info!(
            nodes = summary.nodes,
            errors = summary.errors,
            warnings = summary.warnings,
            written = summary.written.len(),
            "build finished"
        );
        Ok(summary)
    }

    /// Counters over every node, as they stand now.
    pub fn summary(&self) -> BuildSummary {
        let mut summary = BuildSummary {
            nodes: self.nodes.len(),
            ..BuildSummary::default()
        };
        for node in &self.nodes {
            summary.errors += node.error_count();
            summary.warnings += node.warning_count();
            if node.is_poisoned() {
                summary.failed.push(node.module().to_string());
            }
            if let Some(path) = node.written_path() {
                summary.written.push(path.to_path_buf());
            }
        }
        summary
    }

    /// How many nodes reached each point of the pipeline.
    pub fn progress_counts(&self) -> Vec<(NodeProgress, usize)> {
        let mut counts: IndexMap<NodeProgress, usize> = IndexMap::new();
        for node in &self.nodes {
            *counts.entry(node.progress()).or_default() += 1;
        }
        counts.sort_keys();
        counts.into_iter().collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.context.jobs.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("nodes", &self.nodes.len())
            .field("context", &self.context)
            .finish()
    }
}

/// The module name of `path` below `root`: directories become namespaces and
/// the file stem becomes the primary type.
pub fn module_name(path: &Path, root: &Path) -> QualifiedName {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let namespace: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let name = relative
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    QualifiedName::new(namespace, name)
}

/// Every `.bs` file below `dir`, sorted.
pub fn discover_sources(dir: &Path) -> Result<Vec<PathBuf>, SessionError> {
    let mut found = Vec::new();
    walk(dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), SessionError> {
    let io_error = |source| SessionError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if !hidden {
                walk(&path, found)?;
            }
        } else if path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            found.push(path);
        }
    }
    Ok(())
}
