//! Writes artifacts into an output tree mirroring the module namespaces.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bscript_ast::QualifiedName;

use crate::artifact::BytecodeArtifact;

pub const BYTECODE_EXTENSION: &str = "bsc";
pub const ASSEMBLY_EXTENSION: &str = "bsa";

/// Write `artifact` to `<out_dir>/a/b/Name.bsc`, plus `Name.bsa` next to it
/// when `emit_assembly` is set. Returns the bytecode path.
pub fn write_artifact(artifact: &BytecodeArtifact, out_dir: &Path, emit_assembly: bool) -> io::Result<PathBuf> {
    let module = QualifiedName::parse(artifact.module_name()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("artifact has an invalid module name '{}'", artifact.module_name()),
        )
    })?;

    let bytecode_path = out_dir.join(module.relative_path(BYTECODE_EXTENSION));
    if let Some(parent) = bytecode_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&bytecode_path, artifact.encode())?;
    tracing::debug!(path = %bytecode_path.display(), "wrote bytecode");

    if emit_assembly {
        let assembly_path = bytecode_path.with_extension(ASSEMBLY_EXTENSION);
        fs::write(&assembly_path, artifact.to_assembly())?;
        tracing::debug!(path = %assembly_path.display(), "wrote assembly");
    }
    Ok(bytecode_path)
}
