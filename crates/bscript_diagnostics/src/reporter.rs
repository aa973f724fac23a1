use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bscript_core::text::TextSpan;
use parking_lot::Mutex;

use crate::{Diagnostic, DiagnosticCategory, DiagnosticMessage};

/// Receives every diagnostic at the moment it is reported.
///
/// Sinks are shared by all files of a session and called from whichever
/// thread runs the reporting stage, so output from different files may
/// interleave.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        let file = diagnostic.file.as_deref().unwrap_or("<session>");
        match diagnostic.category {
            DiagnosticCategory::Error => tracing::error!(
                target: "bscript::diagnostics",
                file,
                code = diagnostic.code,
                "{}",
                diagnostic.message_text
            ),
            DiagnosticCategory::Warning => tracing::warn!(
                target: "bscript::diagnostics",
                file,
                code = diagnostic.code,
                "{}",
                diagnostic.message_text
            ),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Diagnostics raised against `file`, in the order they were reported.
    pub fn for_file(&self, file: &str) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.file.as_deref() == Some(file))
            .cloned()
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.lock().iter().filter(|d| d.is_error()).count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.diagnostics.lock().push(diagnostic.clone());
    }
}

/// The diagnostics context private to one compilation node.
///
/// Only the thread running the node's active stage reports through it; the
/// counters are atomic so the driver can read totals afterwards.
pub struct Reporter {
    file: String,
    sink: Arc<dyn DiagnosticSink>,
    errors: AtomicUsize,
    warnings: AtomicUsize,
    warnings_as_errors: bool,
}

impl Reporter {
    pub fn new(file: impl Into<String>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            file: file.into(),
            sink,
            errors: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
            warnings_as_errors: false,
        }
    }

    /// Treat every warning reported through this context as an error.
    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Report `message` against this file.
    pub fn report(&self, message: &DiagnosticMessage, span: Option<TextSpan>, args: &[&str]) {
        self.push(Diagnostic::with_location(self.file.clone(), span, message, args));
    }

    /// Record an already built diagnostic and forward it to the sink.
    pub fn push(&self, mut diagnostic: Diagnostic) {
        if self.warnings_as_errors {
            diagnostic.category = DiagnosticCategory::Error;
        }
        match diagnostic.category {
            DiagnosticCategory::Error => self.errors.fetch_add(1, Ordering::Relaxed),
            DiagnosticCategory::Warning => self.warnings.fetch_add(1, Ordering::Relaxed),
        };
        self.sink.emit(&diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("file", &self.file)
            .field("errors", &self.error_count())
            .field("warnings", &self.warning_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages;

    #[test]
    fn test_counts_and_forwards() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = Reporter::new("a/B.bs", sink.clone());
        reporter.report(&messages::EMPTY_STRUCT_0, None, &["B"]);
        reporter.report(&messages::CANNOT_FIND_TYPE_0, Some(TextSpan::new(3, 1)), &["C"]);

        assert_eq!(reporter.warning_count(), 1);
        assert_eq!(reporter.error_count(), 1);
        assert!(reporter.has_errors());
        let seen = sink.for_file("a/B.bs");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].message_text, "Cannot find type 'C'.");
    }

    #[test]
    fn test_warnings_as_errors() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = Reporter::new("B.bs", sink.clone()).with_warnings_as_errors(true);
        reporter.report(&messages::EMPTY_ENUM_0, None, &["B"]);
        assert_eq!(reporter.error_count(), 1);
        assert_eq!(reporter.warning_count(), 0);
        assert_eq!(sink.error_count(), 1);
    }
}
