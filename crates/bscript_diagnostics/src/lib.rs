//! bscript_diagnostics: Diagnostic messages and error reporting infrastructure.
//!
//! Local diagnostics are recorded on a per-file [`Reporter`] and forwarded to
//! a [`DiagnosticSink`] as soon as they are raised. Failures that abort the
//! whole compilation are [`FatalError`] values propagated through `Result`.

mod fatal;
mod reporter;

pub use fatal::FatalError;
pub use reporter::{CollectingSink, DiagnosticSink, Reporter, TracingSink};

use bscript_core::text::TextSpan;
use std::fmt;

/// Diagnostic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    Warning,
    Error,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::Warning => write!(f, "warning"),
            DiagnosticCategory::Error => write!(f, "error"),
        }
    }
}

/// A diagnostic message template with a code and category.
#[derive(Debug, Clone)]
pub struct DiagnosticMessage {
    /// The diagnostic code (e.g., 1001, 2001).
    pub code: u32,
    /// The category of this diagnostic.
    pub category: DiagnosticCategory,
    /// The message template. May contain `{0}`, `{1}`, etc. placeholders.
    pub message: &'static str,
}

/// A realized diagnostic with location information and resolved message text.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// The file the diagnostic was raised against, if any.
    pub file: Option<String>,
    /// The byte span the diagnostic points at, if any.
    pub span: Option<TextSpan>,
    pub message_text: String,
    pub code: u32,
    pub category: DiagnosticCategory,
}

impl Diagnostic {
    /// Create a diagnostic without location info.
    pub fn new(message: &DiagnosticMessage, args: &[&str]) -> Self {
        Self {
            file: None,
            span: None,
            message_text: format_message(message.message, args),
            code: message.code,
            category: message.category,
        }
    }

    /// Create a diagnostic with file and span info.
    pub fn with_location(
        file: String,
        span: Option<TextSpan>,
        message: &DiagnosticMessage,
        args: &[&str],
    ) -> Self {
        Self {
            file: Some(file),
            span,
            ..Self::new(message, args)
        }
    }

    pub fn is_error(&self) -> bool {
        self.category == DiagnosticCategory::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}", file)?;
            if let Some(span) = self.span {
                write!(f, "({})", span.start)?;
            }
            write!(f, ": ")?;
        }
        write!(f, "{} BS{}: {}", self.category, self.code, self.message_text)
    }
}

/// Format a message template by replacing `{0}`, `{1}`, etc. with arguments.
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut result = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        result = result.replace(&format!("{{{}}}", i), arg);
    }
    result
}

// ============================================================================
// Diagnostic Messages
// ============================================================================

pub mod messages {
    use super::*;

    macro_rules! diag {
        ($code:expr, Error, $msg:expr) => {
            DiagnosticMessage { code: $code, category: DiagnosticCategory::Error, message: $msg }
        };
        ($code:expr, Warning, $msg:expr) => {
            DiagnosticMessage { code: $code, category: DiagnosticCategory::Warning, message: $msg }
        };
    }

    // ========================================================================
    // Input errors (1000-1099)
    // ========================================================================
    pub const CANNOT_READ_FILE_0_1: DiagnosticMessage = diag!(1001, Error, "Cannot read file '{0}': {1}.");
    pub const FILE_IS_NOT_VALID_UTF8: DiagnosticMessage = diag!(1002, Error, "File is not valid UTF-8.");
    pub const FILE_IS_EMPTY: DiagnosticMessage = diag!(1003, Warning, "File '{0}' is empty.");

    // ========================================================================
    // Syntax errors (1100-1199)
    // ========================================================================
    pub const UNEXPECTED_CHARACTER_0: DiagnosticMessage = diag!(1101, Error, "Unexpected character '{0}'.");
    pub const DECLARATION_EXPECTED: DiagnosticMessage = diag!(1102, Error, "Declaration expected.");
    pub const _0_EXPECTED: DiagnosticMessage = diag!(1103, Error, "'{0}' expected.");
    pub const IDENTIFIER_EXPECTED: DiagnosticMessage = diag!(1104, Error, "Identifier expected.");
    pub const _0_IS_A_RESERVED_WORD: DiagnosticMessage = diag!(1105, Error, "'{0}' is a reserved word and cannot be used as a name.");
    pub const IDENTIFIER_TOO_LONG: DiagnosticMessage = diag!(1106, Error, "Identifier is too long.");

    // ========================================================================
    // Declaration errors (2000-2099)
    // ========================================================================
    pub const MODULE_0_MUST_DECLARE_TYPE_1: DiagnosticMessage = diag!(2001, Error, "Module '{0}' must declare a type named '{1}'.");
    pub const DUPLICATE_TYPE_0: DiagnosticMessage = diag!(2002, Error, "Duplicate type '{0}'.");
    pub const DUPLICATE_MEMBER_0_IN_1: DiagnosticMessage = diag!(2003, Error, "Duplicate member '{0}' in '{1}'.");
    pub const TYPE_0_IS_ALREADY_DECLARED_BY_ANOTHER_MODULE: DiagnosticMessage = diag!(2004, Error, "Type '{0}' is already declared by another module.");
    pub const EMPTY_ENUM_0: DiagnosticMessage = diag!(2005, Warning, "Enum '{0}' has no variants.");
    pub const EMPTY_STRUCT_0: DiagnosticMessage = diag!(2006, Warning, "Struct '{0}' has no fields.");

    // ========================================================================
    // Resolution errors (2100-2199)
    // ========================================================================
    pub const CANNOT_FIND_TYPE_0: DiagnosticMessage = diag!(2101, Error, "Cannot find type '{0}'.");
    pub const TYPE_0_HAS_NO_MEMBER_1: DiagnosticMessage = diag!(2102, Error, "Type '{0}' has no member '{1}'.");
    pub const TYPE_0_FROM_FAILED_MODULE_1: DiagnosticMessage = diag!(2103, Error, "Type '{0}' comes from module '{1}', which failed to compile.");
    pub const _0_IS_NOT_AN_ENUM: DiagnosticMessage = diag!(2104, Error, "'{0}' is not an enum.");
    pub const _0_REFERS_TO_A_MEMBER_NOT_A_TYPE: DiagnosticMessage = diag!(2105, Error, "'{0}' refers to a member, not a type.");
    pub const STRUCT_0_CONTAINS_ITSELF: DiagnosticMessage = diag!(2106, Error, "Struct '{0}' contains itself.");
    pub const CONSTANT_0_NEEDS_A_MEMBER: DiagnosticMessage = diag!(2107, Error, "Constant '{0}' must name an enum variant.");

    // ========================================================================
    // Output errors (5000-5099)
    // ========================================================================
    pub const CANNOT_WRITE_FILE_0_1: DiagnosticMessage = diag!(5001, Error, "Cannot write file '{0}': {1}.");
}
