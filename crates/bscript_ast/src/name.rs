use std::fmt;
use std::path::PathBuf;

/// Separator between namespace segments and names.
pub const SEPARATOR: char = ':';

/// A module name such as `geometry:shapes:Line`: a namespace path plus the
/// module's primary type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    namespace: Vec<String>,
    name: String,
}

impl QualifiedName {
    pub fn new<I, S>(namespace: I, name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into_iter().map(Into::into).collect(),
            name: name.into(),
        }
    }

    /// Parse `a:b:Name`. Empty segments are ignored; an empty input has no
    /// name and yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut segments: Vec<String> = text
            .split(SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        let name = segments.pop()?;
        Some(Self {
            namespace: segments,
            name,
        })
    }

    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    /// The namespace joined with `:` (empty for the root namespace).
    pub fn namespace_path(&self) -> String {
        self.namespace.join(":")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The qualified name of a sibling type declared in the same namespace.
    pub fn sibling(&self, name: &str) -> QualifiedName {
        Self {
            namespace: self.namespace.clone(),
            name: name.to_string(),
        }
    }

    /// `a/b/Name.<extension>`.
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        let mut path: PathBuf = self.namespace.iter().collect();
        path.push(format!("{}.{}", self.name, extension));
        path
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.namespace {
            write!(f, "{}{}", segment, SEPARATOR)?;
        }
        f.write_str(&self.name)
    }
}
