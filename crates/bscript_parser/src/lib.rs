//! bscript_parser: Scanner and recursive-descent parser for bscript modules.

pub mod parser;
pub mod scanner;

pub use parser::Parser;
pub use scanner::{Scanner, Token, TokenKind};

use bscript_ast::ScriptTree;
use bscript_core::StringPool;
use bscript_diagnostics::{messages, FatalError, Reporter};

/// Parse raw file bytes.
///
/// Syntax problems are reported through `reporter` and the partial tree is
/// still returned. `None` means the bytes could not be read as source text
/// at all. Only string pool exhaustion is fatal.
pub fn parse_source(
    bytes: &[u8],
    strings: &mut StringPool,
    reporter: &Reporter,
) -> Result<Option<ScriptTree>, FatalError> {
    let text = match simdutf8::basic::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            reporter.report(&messages::FILE_IS_NOT_VALID_UTF8, None, &[]);
            return Ok(None);
        }
    };
    if text.trim().is_empty() {
        reporter.report(&messages::FILE_IS_EMPTY, None, &[reporter.file()]);
    }
    Parser::new(text, strings, reporter).parse_script().map(Some)
}
