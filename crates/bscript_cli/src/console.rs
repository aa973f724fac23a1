//! Terminal output for diagnostics.

use std::io::{self, Write};

use bscript_diagnostics::{Diagnostic, DiagnosticSink};

// ANSI color codes
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const GRAY: &str = "\x1b[90m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Prints each diagnostic to stderr as soon as it is reported. One
/// diagnostic is written under one stderr lock, so lines from different
/// threads never mix.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink {
    color: bool,
}

impl ConsoleSink {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl DiagnosticSink for ConsoleSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        let line = render(diagnostic, self.color);
        let _ = writeln!(io::stderr().lock(), "{line}");
    }
}

/// One diagnostic as a single line, colored when `color` is set.
pub fn render(diagnostic: &Diagnostic, color: bool) -> String {
    if !color {
        return diagnostic.to_string();
    }
    let mut out = String::new();
    if let Some(file) = &diagnostic.file {
        out.push_str(&format!("{CYAN}{file}{RESET}"));
        if let Some(span) = diagnostic.span {
            out.push_str(&format!("({})", span.start));
        }
        out.push_str(": ");
    }
    let category_color = if diagnostic.is_error() { RED } else { YELLOW };
    out.push_str(&format!(
        "{BOLD}{category_color}{}{RESET} {CYAN}BS{}{RESET}: {}",
        diagnostic.category, diagnostic.code, diagnostic.message_text
    ));
    out
}

/// The closing line: error count, or elapsed time on success.
pub fn render_footer(errors: usize, seconds: f64, color: bool) -> Option<String> {
    let plural = if errors == 1 { "" } else { "s" };
    match (errors, color) {
        (0, true) => Some(format!("{GRAY}Compilation completed in {seconds:.2}s.{RESET}")),
        (0, false) => None,
        (_, true) => Some(format!("\n{RED}Found {errors} error{plural}.{RESET}")),
        (_, false) => Some(format!("\nFound {errors} error{plural}.")),
    }
}

/// Whether stderr is attached to a terminal.
pub fn stderr_is_terminal() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: isatty only inspects the descriptor.
        unsafe { libc::isatty(2) != 0 }
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bscript_diagnostics::messages;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_render_matches_display() {
        let diagnostic = Diagnostic::with_location("src/A.bs".into(), None, &messages::CANNOT_FIND_TYPE_0, &["B"]);
        assert_eq!(
            render(&diagnostic, false),
            "src/A.bs: error BS2101: Cannot find type 'B'."
        );
    }

    #[test]
    fn test_colored_render_keeps_code_and_text() {
        let diagnostic = Diagnostic::with_location("A.bs".into(), None, &messages::EMPTY_STRUCT_0, &["A"]);
        let line = render(&diagnostic, true);
        assert!(line.contains(YELLOW));
        assert!(line.contains("BS2006"));
        assert!(line.ends_with("Struct 'A' has no fields."));
    }

    #[test]
    fn test_footer() {
        assert_eq!(render_footer(0, 0.5, false), None);
        assert_eq!(render_footer(1, 0.5, false).as_deref(), Some("\nFound 1 error."));
        assert_eq!(render_footer(3, 0.5, false).as_deref(), Some("\nFound 3 errors."));
        assert!(render_footer(0, 0.5, true).unwrap().contains("0.50s"));
    }
}
