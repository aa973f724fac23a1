//! Recursive-descent parser producing a [`ScriptTree`].
//!
//! ```text
//! script      = declaration*
//! declaration = "struct" Ident "{" (Ident ":" path [","|";"])* "}"
//!             | "enum" Ident "{" (Ident [","])* "}"
//!             | "const" Ident "=" path [";"]
//! path        = Ident (":" Ident)*
//! ```
//!
//! After a syntax error the parser skips to the next declaration keyword, so
//! one bad declaration does not hide errors in the rest of the file.

use bscript_ast::{Builtin, Declaration, DeclarationKind, Field, Ident, Path, ScriptTree};
use bscript_core::string_pool::{StringPoolError, MAX_STRING_LEN};
use bscript_core::text::TextSpan;
use bscript_core::StringPool;
use bscript_diagnostics::{messages, DiagnosticMessage, FatalError, Reporter};

use crate::scanner::{Scanner, Token, TokenKind};

enum Halt {
    /// A syntax error that has already been reported.
    Recover,
    Fatal(FatalError),
}

impl From<StringPoolError> for Halt {
    fn from(error: StringPoolError) -> Self {
        Halt::Fatal(error.into())
    }
}

type ParseResult<T> = Result<T, Halt>;

pub struct Parser<'a, 'r> {
    scanner: Scanner<'a>,
    token: Token,
    /// End offset of the last consumed token.
    last_end: u32,
    strings: &'r mut StringPool,
    reporter: &'r Reporter,
}

impl<'a, 'r> Parser<'a, 'r> {
    pub fn new(source_text: &'a str, strings: &'r mut StringPool, reporter: &'r Reporter) -> Self {
        let mut scanner = Scanner::new(source_text);
        let token = scanner.scan();
        Self {
            scanner,
            token,
            last_end: 0,
            strings,
            reporter,
        }
    }

    pub fn parse_script(mut self) -> Result<ScriptTree, FatalError> {
        let mut declarations = Vec::new();
        loop {
            match self.current_token() {
                TokenKind::EndOfFile => break,
                TokenKind::Semicolon => self.next_token(),
                kind if kind.is_declaration_keyword() => match self.parse_declaration() {
                    Ok(declaration) => declarations.push(declaration),
                    Err(Halt::Recover) => self.skip_to_declaration(),
                    Err(Halt::Fatal(error)) => return Err(error),
                },
                TokenKind::Unknown => {
                    let text = self.scanner.token_text(self.token);
                    self.error(&messages::UNEXPECTED_CHARACTER_0, &[text]);
                    self.next_token();
                    self.skip_to_declaration();
                }
                _ => {
                    self.error(&messages::DECLARATION_EXPECTED, &[]);
                    self.next_token();
                    self.skip_to_declaration();
                }
            }
        }
        Ok(ScriptTree { declarations })
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    #[inline]
    fn current_token(&self) -> TokenKind {
        self.token.kind
    }

    #[inline]
    fn next_token(&mut self) {
        self.last_end = self.token.span.end();
        self.token = self.scanner.scan();
    }

    fn optional_token(&mut self, kind: TokenKind) -> bool {
        if self.current_token() == kind {
            self.next_token();
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, kind: TokenKind, text: &str) -> ParseResult<()> {
        if self.optional_token(kind) {
            Ok(())
        } else {
            self.error(&messages::_0_EXPECTED, &[text]);
            Err(Halt::Recover)
        }
    }

    fn error(&self, message: &DiagnosticMessage, args: &[&str]) {
        self.reporter.report(message, Some(self.token.span), args);
    }

    /// Advance to the next declaration keyword. A keyword that interrupted a
    /// broken declaration is kept and starts the next one.
    fn skip_to_declaration(&mut self) {
        while !self.current_token().is_declaration_keyword() && self.current_token() != TokenKind::EndOfFile {
            self.next_token();
        }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn parse_declaration(&mut self) -> ParseResult<Declaration> {
        let keyword = self.current_token();
        let start = self.token.span.start;
        self.next_token();

        let name = self.parse_identifier()?;
        if let Some(text) = self.strings.get_str(name.symbol) {
            if Builtin::from_name(text).is_some() {
                self.reporter
                    .report(&messages::_0_IS_A_RESERVED_WORD, Some(name.span), &[text]);
            }
        }

        let kind = match keyword {
            TokenKind::StructKeyword => DeclarationKind::Struct(self.parse_struct_body()?),
            TokenKind::EnumKeyword => DeclarationKind::Enum(self.parse_enum_body()?),
            _ => DeclarationKind::Const(self.parse_const_value()?),
        };
        Ok(Declaration {
            name,
            kind,
            span: TextSpan::from_bounds(start, self.last_end),
        })
    }

    fn parse_struct_body(&mut self) -> ParseResult<Vec<Field>> {
        self.expect_token(TokenKind::OpenBrace, "{")?;
        let mut fields = Vec::new();
        loop {
            match self.current_token() {
                TokenKind::CloseBrace => {
                    self.next_token();
                    return Ok(fields);
                }
                TokenKind::Identifier => {
                    let name = self.parse_identifier()?;
                    self.expect_token(TokenKind::Colon, ":")?;
                    let ty = self.parse_path()?;
                    fields.push(Field { name, ty });
                    if !self.optional_token(TokenKind::Comma) {
                        self.optional_token(TokenKind::Semicolon);
                    }
                }
                _ => {
                    self.error(&messages::_0_EXPECTED, &["}"]);
                    return Err(Halt::Recover);
                }
            }
        }
    }

    fn parse_enum_body(&mut self) -> ParseResult<Vec<Ident>> {
        self.expect_token(TokenKind::OpenBrace, "{")?;
        let mut variants = Vec::new();
        loop {
            match self.current_token() {
                TokenKind::CloseBrace => {
                    self.next_token();
                    return Ok(variants);
                }
                TokenKind::Identifier => {
                    variants.push(self.parse_identifier()?);
                    self.optional_token(TokenKind::Comma);
                }
                _ => {
                    self.error(&messages::_0_EXPECTED, &["}"]);
                    return Err(Halt::Recover);
                }
            }
        }
    }

    fn parse_const_value(&mut self) -> ParseResult<Path> {
        self.expect_token(TokenKind::Equals, "=")?;
        let path = self.parse_path()?;
        self.optional_token(TokenKind::Semicolon);
        Ok(path)
    }

    // ========================================================================
    // Names
    // ========================================================================

    fn parse_path(&mut self) -> ParseResult<Path> {
        let mut segments = vec![self.parse_identifier()?];
        while self.optional_token(TokenKind::Colon) {
            segments.push(self.parse_identifier()?);
        }
        Ok(Path { segments })
    }

    fn parse_identifier(&mut self) -> ParseResult<Ident> {
        match self.current_token() {
            TokenKind::Identifier => {}
            kind if kind.is_declaration_keyword() => {
                let text = self.scanner.token_text(self.token);
                self.error(&messages::_0_IS_A_RESERVED_WORD, &[text]);
                return Err(Halt::Recover);
            }
            _ => {
                self.error(&messages::IDENTIFIER_EXPECTED, &[]);
                return Err(Halt::Recover);
            }
        }
        let span = self.token.span;
        let text = self.scanner.token_text(self.token);
        if text.len() > MAX_STRING_LEN {
            self.error(&messages::IDENTIFIER_TOO_LONG, &[]);
            return Err(Halt::Recover);
        }
        let symbol = self.strings.intern(text)?;
        self.next_token();
        Ok(Ident { symbol, span })
    }
}
