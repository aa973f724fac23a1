//! Tokenizer for bscript source text.

use bscript_core::text::TextSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    StructKeyword,
    EnumKeyword,
    ConstKeyword,
    OpenBrace,
    CloseBrace,
    Colon,
    Comma,
    Semicolon,
    Equals,
    Unknown,
    EndOfFile,
}

impl TokenKind {
    pub fn from_keyword(text: &str) -> Option<TokenKind> {
        match text {
            "struct" => Some(TokenKind::StructKeyword),
            "enum" => Some(TokenKind::EnumKeyword),
            "const" => Some(TokenKind::ConstKeyword),
            _ => None,
        }
    }

    pub fn is_declaration_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::StructKeyword | TokenKind::EnumKeyword | TokenKind::ConstKeyword
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: TextSpan,
}

/// Converts source text into tokens. Comments start with `#` or `//` and run
/// to the end of the line.
pub struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// The source text covered by `token`.
    pub fn token_text(&self, token: Token) -> &'a str {
        &self.text[token.span.to_range()]
    }

    pub fn scan(&mut self) -> Token {
        self.skip_trivia();
        let start = self.pos;
        let Some(ch) = self.text[self.pos..].chars().next() else {
            return self.token(TokenKind::EndOfFile, start);
        };

        let kind = match ch {
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '=' => TokenKind::Equals,
            ch if is_identifier_start(ch) => {
                self.pos += ch.len_utf8();
                self.scan_identifier_rest();
                let text = &self.text[start..self.pos];
                let kind = TokenKind::from_keyword(text).unwrap_or(TokenKind::Identifier);
                return self.token(kind, start);
            }
            _ => TokenKind::Unknown,
        };
        self.pos += ch.len_utf8();
        self.token(kind, start)
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            span: TextSpan::from_bounds(start as u32, self.pos as u32),
        }
    }

    fn scan_identifier_rest(&mut self) {
        for ch in self.text[self.pos..].chars() {
            if !is_identifier_part(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn skip_trivia(&mut self) {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'#' => self.skip_line(),
                b'/' if bytes.get(self.pos + 1) == Some(&b'/') => self.skip_line(),
                _ => {
                    let ch = self.text[self.pos..].chars().next();
                    match ch {
                        Some(ch) if ch.is_whitespace() => self.pos += ch.len_utf8(),
                        _ => return,
                    }
                }
            }
        }
    }

    fn skip_line(&mut self) {
        let rest = &self.text.as_bytes()[self.pos..];
        self.pos += memchr::memchr(b'\n', rest).map_or(rest.len(), |newline| newline + 1);
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphabetic() || (!ch.is_ascii() && unicode_xid::UnicodeXID::is_xid_start(ch))
}

fn is_identifier_part(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphanumeric() || (!ch.is_ascii() && unicode_xid::UnicodeXID::is_xid_continue(ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(text);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan();
            kinds.push(token.kind);
            if token.kind == TokenKind::EndOfFile {
                return kinds;
            }
        }
    }

    #[test]
    fn test_scan_declaration() {
        use TokenKind::*;
        assert_eq!(
            kinds("struct P { x: geo:Vec2, }"),
            vec![StructKeyword, Identifier, OpenBrace, Identifier, Colon, Identifier, Colon, Identifier, Comma, CloseBrace, EndOfFile]
        );
    }

    #[test]
    fn test_comments_are_trivia() {
        use TokenKind::*;
        assert_eq!(
            kinds("# header\nenum E { A } // trailing\n// last"),
            vec![EnumKeyword, Identifier, OpenBrace, Identifier, CloseBrace, EndOfFile]
        );
    }

    #[test]
    fn test_unicode_identifiers_and_spans() {
        let mut scanner = Scanner::new("  Größe €");
        let ident = scanner.scan();
        assert_eq!(ident.kind, TokenKind::Identifier);
        assert_eq!(scanner.token_text(ident), "Größe");
        assert_eq!(ident.span.start, 2);
        let unknown = scanner.scan();
        assert_eq!(unknown.kind, TokenKind::Unknown);
        assert_eq!(scanner.token_text(unknown), "€");
    }
}
