//! One file's compilation state and its six-stage pipeline.
//!
//! Every stage is a [`StageJob`] registered with the session's job manager.
//! A stage first awaits its predecessor, so stages of one node always run in
//! order even though any thread may run any of them. The node's mutable
//! state sits behind a mutex that is held only while a stage body runs.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bscript_ast::{ModuleExports, QualifiedName, ResolvedScript, ScriptTree};
use bscript_core::{BumpPool, ConcurrentBumpPool, Placed, StringPool};
use bscript_diagnostics::{messages, FatalError, Reporter};
use bscript_emitter::BytecodeArtifact;
use bscript_jobs::{Job, JobHeader, JobResult, JobState};
use parking_lot::Mutex;

use crate::context::CompilationContext;
use crate::toolchain::{Lookup, TypeLookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    Parse,
    PreSemantic,
    Semantic,
    CodeGenerate,
    Write,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Read,
        Stage::Parse,
        Stage::PreSemantic,
        Stage::Semantic,
        Stage::CodeGenerate,
        Stage::Write,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn predecessor(self) -> Option<Stage> {
        self.index().checked_sub(1).map(|index| Stage::ALL[index])
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::Parse => "parse",
            Stage::PreSemantic => "pre-semantic",
            Stage::Semantic => "semantic",
            Stage::CodeGenerate => "code-generate",
            Stage::Write => "write",
        }
    }

    /// The progress a node reaches when this stage succeeds.
    pub fn completes(self) -> NodeProgress {
        match self {
            Stage::Read => NodeProgress::Read,
            Stage::Parse => NodeProgress::Parsed,
            Stage::PreSemantic => NodeProgress::PreSemantic,
            Stage::Semantic => NodeProgress::Semantic,
            Stage::CodeGenerate => NodeProgress::CodeGenerated,
            Stage::Write => NodeProgress::Written,
        }
    }
}

/// How far a node got. Monotonic; a node that reported errors stops
/// advancing.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeProgress {
    Unstarted,
    Read,
    Parsed,
    PreSemantic,
    Semantic,
    CodeGenerated,
    Written,
}

impl NodeProgress {
    fn from_u8(value: u8) -> NodeProgress {
        match value {
            1 => NodeProgress::Read,
            2 => NodeProgress::Parsed,
            3 => NodeProgress::PreSemantic,
            4 => NodeProgress::Semantic,
            5 => NodeProgress::CodeGenerated,
            6 => NodeProgress::Written,
            _ => NodeProgress::Unstarted,
        }
    }
}

/// Where a node's bytes come from.
#[derive(Debug, Clone)]
pub enum NodeSource {
    File(PathBuf),
    Memory(String),
}

/// A pipeline stage of one node, as seen by the job manager.
pub struct StageJob {
    header: JobHeader,
    stage: Stage,
    label: String,
    node: Weak<CompilationNode>,
}

impl StageJob {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl Job for StageJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn run(&self) -> JobResult {
        let node = self.node.upgrade().ok_or_else(|| FatalError::NodeReleased {
            module: self.label.clone(),
        })?;
        node.run_stage(self.stage)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// State owned by whichever thread runs the node's current stage.
struct NodeData {
    arena: BumpPool<'static>,
    strings: StringPool,
    /// Handle into the session's shared buffer pool.
    source: Option<Placed<[u8]>>,
    script: Option<Placed<ScriptTree>>,
    resolved: Option<Placed<ResolvedScript>>,
    artifact: Option<Placed<BytecodeArtifact>>,
}

impl NodeData {
    /// Drop everything placed in the arena and forget the interned names.
    fn release(&mut self) {
        self.script = None;
        self.resolved = None;
        self.artifact = None;
        self.source = None;
        self.arena.reset();
        self.strings.reset();
    }
}

pub struct CompilationNode {
    module: QualifiedName,
    /// Path used in diagnostics.
    file: String,
    source: NodeSource,
    /// `None` for nodes compiled for reference only.
    output: Option<PathBuf>,
    context: Arc<CompilationContext>,
    reporter: Reporter,
    jobs: [Arc<StageJob>; 6],
    progress: AtomicU8,
    poisoned: AtomicBool,
    data: Mutex<NodeData>,
    exports: OnceLock<Arc<ModuleExports>>,
    written: OnceLock<PathBuf>,
}

impl CompilationNode {
    /// Create a node and register its six stage jobs. Nothing is queued.
    pub fn new(
        context: &Arc<CompilationContext>,
        module: QualifiedName,
        file: String,
        source: NodeSource,
        output: Option<PathBuf>,
    ) -> Result<Arc<Self>, FatalError> {
        let options = &context.options;
        let reporter =
            Reporter::new(file.clone(), Arc::clone(&context.sink)).with_warnings_as_errors(options.warnings_as_errors);
        let mut arena = BumpPool::with_heap_size(options.heap_size);
        if let Some(limit) = options.arena_limit {
            arena = arena.with_limit(limit);
        }
        let data = NodeData {
            arena,
            strings: StringPool::with_capacity(options.string_pool_capacity),
            source: None,
            script: None,
            resolved: None,
            artifact: None,
        };

        let node = Arc::new_cyclic(|weak: &Weak<CompilationNode>| {
            let jobs = Stage::ALL.map(|stage| {
                Arc::new(StageJob {
                    header: JobHeader::new(),
                    stage,
                    label: format!("{} {}", module, stage.label()),
                    node: weak.clone(),
                })
            });
            CompilationNode {
                module,
                file,
                source,
                output,
                context: Arc::clone(context),
                reporter,
                jobs,
                progress: AtomicU8::new(NodeProgress::Unstarted as u8),
                poisoned: AtomicBool::new(false),
                data: Mutex::new(data),
                exports: OnceLock::new(),
                written: OnceLock::new(),
            }
        });
        for job in &node.jobs {
            node.context.jobs.register(Arc::clone(job) as Arc<dyn Job>)?;
        }
        Ok(node)
    }

    pub fn module(&self) -> &QualifiedName {
        &self.module
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn error_count(&self) -> usize {
        self.reporter.error_count()
    }

    pub fn warning_count(&self) -> usize {
        self.reporter.warning_count()
    }

    pub fn progress(&self) -> NodeProgress {
        NodeProgress::from_u8(self.progress.load(Ordering::Acquire))
    }

    /// Whether a stage reported errors and the rest of the pipeline is
    /// skipped.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn stage_state(&self, stage: Stage) -> JobState {
        self.job(stage).header().state()
    }

    pub fn job(&self, stage: Stage) -> &Arc<StageJob> {
        &self.jobs[stage.index()]
    }

    /// The declared types, available once pre-semantic has run.
    pub fn exports(&self) -> Option<Arc<ModuleExports>> {
        self.exports.get().cloned()
    }

    pub fn written_path(&self) -> Option<&Path> {
        self.written.get().map(PathBuf::as_path)
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Queue one stage. Returns `false` if it was already queued.
    pub fn queue_stage(&self, stage: Stage) -> Result<bool, FatalError> {
        self.context.jobs.queue(self.job(stage).as_ref())
    }

    pub fn queue_final_stage(&self) -> Result<bool, FatalError> {
        self.queue_stage(Stage::Write)
    }

    /// Run `stage` (and everything before it) if nobody has, or wait for the
    /// thread that is running it.
    pub fn await_stage(&self, stage: Stage) -> JobResult {
        self.context.jobs.await_job(self.job(stage).as_ref())
    }

    /// Returns whether the file was read.
    pub fn await_read(&self) -> Result<bool, FatalError> {
        self.await_stage(Stage::Read)?;
        Ok(self.reached(Stage::Read))
    }

    /// Returns whether the file parsed without errors.
    pub fn await_parse(&self) -> Result<bool, FatalError> {
        self.await_stage(Stage::Parse)?;
        Ok(self.reached(Stage::Parse))
    }

    /// Returns the module's exports if it resolved without errors.
    pub fn await_semantic(&self) -> Result<Option<Arc<ModuleExports>>, FatalError> {
        self.await_stage(Stage::Semantic)?;
        Ok(if self.reached(Stage::Semantic) {
            self.exports()
        } else {
            None
        })
    }

    /// Returns the bytecode path, if the node was written.
    pub fn await_written(&self) -> Result<Option<PathBuf>, FatalError> {
        self.await_stage(Stage::Write)?;
        Ok(self.written.get().cloned())
    }

    fn reached(&self, stage: Stage) -> bool {
        self.progress() >= stage.completes()
    }

    // ========================================================================
    // Inspection
    //
    // These lock the node's state; never call them from inside one of this
    // node's own stages.
    // ========================================================================

    /// Run `f` on the parse tree, if it is still held.
    pub fn with_script<R>(&self, f: impl FnOnce(&ScriptTree, &StringPool) -> R) -> Option<R> {
        let data = self.data.lock();
        let tree = data.arena.get(data.script?)?;
        Some(f(tree, &data.strings))
    }

    pub fn with_resolved<R>(&self, f: impl FnOnce(&ResolvedScript) -> R) -> Option<R> {
        let data = self.data.lock();
        data.arena.get(data.resolved?).map(f)
    }

    pub fn with_artifact<R>(&self, f: impl FnOnce(&BytecodeArtifact) -> R) -> Option<R> {
        let data = self.data.lock();
        data.arena.get(data.artifact?).map(f)
    }

    /// Bytes the node's arena currently holds.
    pub fn arena_bytes(&self) -> usize {
        self.data.lock().arena.allocated_bytes()
    }

    // ========================================================================
    // Stages
    // ========================================================================

    fn run_stage(self: &Arc<Self>, stage: Stage) -> JobResult {
        if let Some(previous) = stage.predecessor() {
            self.await_stage(previous)?;
        }
        let _span = tracing::debug_span!("stage", module = %self.module, stage = stage.label()).entered();
        let mut data = self.data.lock();
        if self.is_poisoned() {
            if stage == Stage::Write {
                data.release();
            }
            tracing::trace!("skipped");
            return Ok(());
        }

        match stage {
            Stage::Read => self.read(&mut data)?,
            Stage::Parse => self.parse(&mut data)?,
            Stage::PreSemantic => self.pre_semantic(&mut data)?,
            Stage::Semantic => self.semantic(&mut data)?,
            Stage::CodeGenerate => self.code_generate(&mut data)?,
            Stage::Write => self.write(&mut data),
        }

        if self.reporter.has_errors() {
            self.poisoned.store(true, Ordering::Release);
            tracing::debug!(errors = self.reporter.error_count(), "stage reported errors, unwinding node");
        } else {
            self.progress.store(stage.completes() as u8, Ordering::Release);
        }
        Ok(())
    }

    fn read(&self, data: &mut NodeData) -> JobResult {
        let buffers = &self.context.buffers;
        let loaded = match &self.source {
            NodeSource::Memory(text) => Ok(buffers.copy_bytes(text.as_bytes())?),
            NodeSource::File(path) => load_file(buffers, path)?,
        };
        match loaded {
            Ok(source) => data.source = Some(source),
            Err(error) => {
                let reason = error.to_string();
                self.reporter
                    .report(&messages::CANNOT_READ_FILE_0_1, None, &[&self.file, &reason]);
            }
        }
        Ok(())
    }

    fn parse(&self, data: &mut NodeData) -> JobResult {
        let source = data
            .source
            .and_then(|handle| self.context.buffers.get(handle))
            .ok_or_else(|| self.missing("source bytes"))?;
        let parser = &self.context.toolchain.parser;
        if let Some(tree) = parser.parse(source, &mut data.strings, &self.reporter)? {
            data.script = Some(data.arena.place(tree)?);
        }
        Ok(())
    }

    fn pre_semantic(self: &Arc<Self>, data: &mut NodeData) -> JobResult {
        let tree = data
            .script
            .and_then(|handle| data.arena.get(handle))
            .ok_or_else(|| self.missing("parse tree"))?;
        let resolver = &self.context.toolchain.resolver;
        let exports = resolver.declare(&self.module, tree, &data.strings, &self.reporter);

        // The primary type was registered when the node was created.
        let namespace = self.module.namespace_path();
        for name in exports.secondary_types() {
            if self.context.namespaces.register(&namespace, name, self).is_err() {
                let span = tree.find(&data.strings, name).map(|decl| decl.name.span);
                let qualified = self.module.sibling(name).to_string();
                self.reporter
                    .report(&messages::TYPE_0_IS_ALREADY_DECLARED_BY_ANOTHER_MODULE, span, &[&qualified]);
            }
        }
        let _ = self.exports.set(Arc::new(exports));
        Ok(())
    }

    fn semantic(self: &Arc<Self>, data: &mut NodeData) -> JobResult {
        let exports = self.exports().ok_or_else(|| self.missing("exports"))?;
        let tree = data
            .script
            .and_then(|handle| data.arena.get(handle))
            .ok_or_else(|| self.missing("parse tree"))?;
        let lookup = NodeLookup { node: self };
        let resolver = &self.context.toolchain.resolver;
        let resolved = resolver.resolve(&exports, tree, &data.strings, &lookup, &self.reporter)?;
        data.resolved = Some(data.arena.place(resolved)?);
        Ok(())
    }

    fn code_generate(&self, data: &mut NodeData) -> JobResult {
        let resolved = data
            .resolved
            .and_then(|handle| data.arena.get(handle))
            .ok_or_else(|| self.missing("resolved script"))?;
        let artifact = self.context.toolchain.emitter.emit(resolved);
        data.artifact = Some(data.arena.place(artifact)?);
        Ok(())
    }

    fn write(&self, data: &mut NodeData) {
        if let Some(out_dir) = &self.output {
            if let Some(artifact) = data.artifact.and_then(|handle| data.arena.get(handle)) {
                let writer = &self.context.toolchain.writer;
                match writer.write(artifact, out_dir, self.context.options.emit_assembly) {
                    Ok(path) => {
                        let _ = self.written.set(path);
                    }
                    Err(error) => {
                        let target = out_dir.display().to_string();
                        let reason = error.to_string();
                        self.reporter
                            .report(&messages::CANNOT_WRITE_FILE_0_1, None, &[&target, &reason]);
                    }
                }
            }
        }
        data.release();
    }

    fn missing(&self, what: &str) -> FatalError {
        FatalError::Internal(format!("{}: {} missing after its stage succeeded", self.module, what))
    }
}

impl fmt::Debug for CompilationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationNode")
            .field("module", &self.module.to_string())
            .field("file", &self.file)
            .field("progress", &self.progress())
            .field("poisoned", &self.is_poisoned())
            .field("errors", &self.error_count())
            .finish()
    }
}

/// Reads a file straight into the shared buffer pool. The outer error is
/// fatal (pool exhausted), the inner one is the file's own problem.
fn load_file(buffers: &ConcurrentBumpPool, path: &Path) -> Result<io::Result<Placed<[u8]>>, FatalError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(error) => return Ok(Err(error)),
    };
    let len = match file.metadata() {
        Ok(metadata) => metadata.len() as usize,
        Err(error) => return Ok(Err(error)),
    };
    let (source, filled) = buffers.fill_bytes(len, |buf| file.read_exact(buf))?;
    Ok(filled.map(|()| source))
}

/// Resolves paths for one node's semantic stage through the namespace index.
struct NodeLookup<'n> {
    node: &'n Arc<CompilationNode>,
}

impl TypeLookup for NodeLookup<'_> {
    fn lookup(&self, path: &str) -> Result<Lookup, FatalError> {
        let context = &self.node.context;
        let Some(hit) = context.namespaces.find(self.node.module.namespace(), path) else {
            return Ok(Lookup::Missing);
        };
        // The node's own exports are already set; awaiting itself would be a cycle.
        let exports = if Arc::ptr_eq(&hit.node, self.node) {
            self.node.exports()
        } else {
            hit.node.await_semantic()?
        };
        Ok(match exports {
            Some(exports) => Lookup::Found {
                exports,
                type_name: hit.type_name,
                member: hit.member,
            },
            None => Lookup::Failed {
                module: hit.node.module.to_string(),
            },
        })
    }
}
