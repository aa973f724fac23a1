//! bscript_options: `bscript.json` project files and compiler options.
//!
//! Every option is optional in the file; defaults are applied when a session
//! is configured, so an empty `{}` is a valid project.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the project file looked up in a project directory.
pub const PROJECT_FILE_NAME: &str = "bscript.json";

/// Deepest `extends` chain that is followed.
const MAX_EXTENDS_DEPTH: usize = 16;

/// Options controlling how a compilation session runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    // -- Scheduling --
    pub workers: Option<usize>,
    pub job_capacity: Option<usize>,

    // -- Memory --
    /// Regular heap size of each node's private arena.
    pub heap_size: Option<usize>,
    /// Regular heap size of the shared file buffer pool.
    pub buffer_heap_size: Option<usize>,
    /// Maximum number of heaps in the shared file buffer chain.
    pub buffer_heap_limit: Option<usize>,
    pub string_pool_capacity: Option<usize>,
    /// Byte budget of each node's private arena.
    pub arena_limit: Option<usize>,

    // -- Output --
    pub emit_assembly: Option<bool>,
    pub warnings_as_errors: Option<bool>,
}

impl CompilerOptions {
    /// Fill every option unset in `self` from `base`.
    pub fn inherit(&mut self, base: &CompilerOptions) {
        macro_rules! inherit {
            ($($field:ident),*) => {
                $(if self.$field.is_none() {
                    self.$field = base.$field;
                })*
            };
        }
        inherit!(
            workers,
            job_capacity,
            heap_size,
            buffer_heap_size,
            buffer_heap_limit,
            string_pool_capacity,
            arena_limit,
            emit_assembly,
            warnings_as_errors
        );
    }
}

/// The `bscript.json` file structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub compiler_options: Option<CompilerOptions>,
    /// Source directories or single files to compile.
    pub sources: Option<Vec<String>>,
    /// Directories compiled for reference only; their artifacts are never
    /// written.
    pub imports: Option<Vec<String>>,
    pub out_dir: Option<String>,
    /// Another project file whose settings this one inherits.
    pub extends: Option<String>,
}

impl ProjectConfig {
    pub fn compiler_options(&self) -> CompilerOptions {
        self.compiler_options.clone().unwrap_or_default()
    }

    /// Make every relative path in the config relative to `base` instead.
    fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut String| {
            if Path::new(path.as_str()).is_relative() {
                *path = base.join(path.as_str()).to_string_lossy().into_owned();
            }
        };
        self.sources.iter_mut().flatten().for_each(rebase);
        self.imports.iter_mut().flatten().for_each(rebase);
        self.out_dir.iter_mut().for_each(rebase);
    }

    /// Take every setting `self` leaves unset from `base`.
    fn inherit(&mut self, base: ProjectConfig) {
        let mut options = self.compiler_options.take().unwrap_or_default();
        if let Some(base_options) = &base.compiler_options {
            options.inherit(base_options);
        }
        self.compiler_options = Some(options);
        self.sources = self.sources.take().or(base.sources);
        self.imports = self.imports.take().or(base.imports);
        self.out_dir = self.out_dir.take().or(base.out_dir);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid project file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("project file '{path}' extends itself")]
    CircularExtends { path: PathBuf },
}

/// Parse a `bscript.json` file from a string. Paths are left as written and
/// `extends` is not followed.
pub fn parse_config(content: &str) -> Result<ProjectConfig, serde_json::Error> {
    serde_json::from_str(content)
}

/// Parse a project file, following its `extends` chain. Relative paths are
/// resolved against the directory of the file that declares them.
pub fn parse_config_file(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let mut chain: Vec<PathBuf> = Vec::new();
    let mut next = Some(path.to_path_buf());
    let mut merged: Option<ProjectConfig> = None;

    while let Some(path) = next.take() {
        if chain.contains(&path) || chain.len() >= MAX_EXTENDS_DEPTH {
            return Err(ConfigError::CircularExtends { path });
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config = parse_config(&content).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
        let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        config.rebase(&dir);
        next = config.extends.take().map(|base| dir.join(base));

        merged = Some(match merged {
            Some(mut child) => {
                child.inherit(config);
                child
            }
            None => config,
        });
        chain.push(path);
    }
    Ok(merged.unwrap_or_default())
}

/// Find the project file for `path`: the path itself if it is a file,
/// otherwise `bscript.json` inside it.
pub fn find_project_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let candidate = path.join(PROJECT_FILE_NAME);
    candidate.is_file().then_some(candidate)
}
