//! State shared by every node of one compilation session.

use std::sync::Arc;

use bscript_core::arena::DEFAULT_HEAP_SIZE;
use bscript_core::concurrent_arena::DEFAULT_MAX_HEAPS;
use bscript_core::string_pool::DEFAULT_STRING_CAPACITY;
use bscript_core::ConcurrentBumpPool;
use bscript_diagnostics::{DiagnosticSink, TracingSink};
use bscript_jobs::{JobManager, JobManagerConfig};
use bscript_options::CompilerOptions;

use crate::namespace::NamespaceIndex;
use crate::node::CompilationNode;
use crate::toolchain::Toolchain;

/// Default regular heap size of the shared file buffer pool.
pub const DEFAULT_BUFFER_HEAP_SIZE: usize = 1 << 20;

/// Fully resolved session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub workers: usize,
    pub job_capacity: usize,
    pub heap_size: usize,
    pub buffer_heap_size: usize,
    pub buffer_heap_limit: usize,
    pub string_pool_capacity: usize,
    /// Byte budget of each node's arena; unlimited when `None`.
    pub arena_limit: Option<usize>,
    pub emit_assembly: bool,
    pub warnings_as_errors: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let jobs = JobManagerConfig::default();
        Self {
            workers: jobs.workers,
            job_capacity: jobs.capacity,
            heap_size: DEFAULT_HEAP_SIZE,
            buffer_heap_size: DEFAULT_BUFFER_HEAP_SIZE,
            buffer_heap_limit: DEFAULT_MAX_HEAPS,
            string_pool_capacity: DEFAULT_STRING_CAPACITY,
            arena_limit: None,
            emit_assembly: false,
            warnings_as_errors: false,
        }
    }
}

impl SessionOptions {
    /// Apply every option set in `options` on top of the defaults.
    pub fn from_compiler_options(options: &CompilerOptions) -> Self {
        let defaults = Self::default();
        Self {
            workers: options.workers.unwrap_or(defaults.workers),
            job_capacity: options.job_capacity.unwrap_or(defaults.job_capacity),
            heap_size: options.heap_size.unwrap_or(defaults.heap_size),
            buffer_heap_size: options.buffer_heap_size.unwrap_or(defaults.buffer_heap_size),
            buffer_heap_limit: options.buffer_heap_limit.unwrap_or(defaults.buffer_heap_limit),
            string_pool_capacity: options.string_pool_capacity.unwrap_or(defaults.string_pool_capacity),
            arena_limit: options.arena_limit.or(defaults.arena_limit),
            emit_assembly: options.emit_assembly.unwrap_or(defaults.emit_assembly),
            warnings_as_errors: options.warnings_as_errors.unwrap_or(defaults.warnings_as_errors),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Everything a [`CompilationNode`] needs besides its own state. Passed to
/// nodes at construction and alive for the whole session.
pub struct CompilationContext {
    pub options: SessionOptions,
    pub jobs: JobManager,
    pub namespaces: NamespaceIndex<CompilationNode>,
    /// Raw file contents of every node.
    pub buffers: ConcurrentBumpPool,
    pub toolchain: Toolchain,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl CompilationContext {
    pub fn new(options: SessionOptions, toolchain: Toolchain, sink: Arc<dyn DiagnosticSink>) -> Self {
        let jobs = JobManager::new(JobManagerConfig {
            workers: options.workers,
            capacity: options.job_capacity,
        });
        let buffers = ConcurrentBumpPool::with_capacity(options.buffer_heap_size, options.buffer_heap_limit);
        Self {
            options,
            jobs,
            namespaces: NamespaceIndex::new(),
            buffers,
            toolchain,
            sink,
        }
    }

    /// A context with the reference toolchain that logs diagnostics.
    pub fn with_options(options: SessionOptions) -> Self {
        Self::new(options, Toolchain::default(), Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationContext")
            .field("options", &self.options)
            .field("jobs", &self.jobs)
            .field("namespaces", &self.namespaces)
            .field("buffers", &self.buffers)
            .finish()
    }
}
