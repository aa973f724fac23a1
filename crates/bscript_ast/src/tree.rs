//! The parsed form of a module. Identifiers are [`StringId`]s into the string
//! pool of the file that was parsed.

use bscript_core::text::TextSpan;
use bscript_core::{StringId, StringPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ident {
    pub symbol: StringId,
    pub span: TextSpan,
}

/// A `:`-separated reference such as `shapes:Color:Red`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<Ident>,
}

impl Path {
    pub fn span(&self) -> TextSpan {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => first.span.cover(last.span),
            _ => TextSpan::default(),
        }
    }

    /// Render the path with the names from `strings`.
    pub fn display(&self, strings: &StringPool) -> String {
        self.segments
            .iter()
            .map(|segment| strings.get_str(segment.symbol).unwrap_or("?"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Ident,
    pub ty: Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationKind {
    Struct(Vec<Field>),
    Enum(Vec<Ident>),
    /// `const Name = Enum:Variant`
    Const(Path),
}

impl DeclarationKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            DeclarationKind::Struct(_) => "struct",
            DeclarationKind::Enum(_) => "enum",
            DeclarationKind::Const(_) => "const",
        }
    }

    /// Whether the declaration introduces a type.
    pub fn is_type(&self) -> bool {
        !matches!(self, DeclarationKind::Const(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: Ident,
    pub kind: DeclarationKind,
    pub span: TextSpan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptTree {
    pub declarations: Vec<Declaration>,
}

impl ScriptTree {
    /// The first declaration named `name`, looked up through the file's pool.
    pub fn find(&self, strings: &StringPool, name: &str) -> Option<&Declaration> {
        let symbol = strings.find(name.as_bytes())?;
        self.declarations.iter().find(|decl| decl.name.symbol == symbol)
    }

    pub fn types(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter().filter(|decl| decl.kind.is_type())
    }
}
