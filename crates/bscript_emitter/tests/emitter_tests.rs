use bscript_ast::{Builtin, QualifiedName, ResolvedConst, ResolvedField, ResolvedScript, ResolvedType, TypeRef, TypeShape};
use bscript_emitter::{emit, write_artifact, BytecodeArtifact, Record};
use pretty_assertions::assert_eq;

fn shape_module() -> ResolvedScript {
    let color = TypeRef::Named {
        module: "gfx:Shape".to_string(),
        qualified: "gfx:Color".to_string(),
    };
    let mut script = ResolvedScript::new(QualifiedName::new(["gfx"], "Shape"));
    script.types.push(ResolvedType {
        name: "Shape".to_string(),
        shape: TypeShape::Struct(vec![
            ResolvedField { name: "sides".to_string(), ty: TypeRef::Builtin(Builtin::Int) },
            ResolvedField { name: "fill".to_string(), ty: color.clone() },
        ]),
    });
    script.types.push(ResolvedType {
        name: "Color".to_string(),
        shape: TypeShape::Enum(vec!["Red".to_string(), "Green".to_string()]),
    });
    script.constants.push(ResolvedConst {
        name: "Default".to_string(),
        ty: color,
        variant: "Green".to_string(),
        ordinal: 1,
    });
    script
}

// ============================================================================
// Encoding
// ============================================================================

#[test]
fn test_encoded_artifact_decodes_to_same_records() {
    let artifact = emit(&shape_module());
    let decoded = BytecodeArtifact::decode(&artifact.encode()).unwrap();
    assert_eq!(decoded, artifact);
    assert_eq!(decoded.module_name(), "gfx:Shape");
    assert!(matches!(decoded.records[2], Record::Const { ordinal: 1, .. }));
}

#[test]
fn test_empty_module_encodes() {
    let artifact = emit(&ResolvedScript::new(QualifiedName::new(Vec::<String>::new(), "Empty")));
    assert!(artifact.records.is_empty());
    assert_eq!(BytecodeArtifact::decode(&artifact.encode()).unwrap(), artifact);
}

// ============================================================================
// Writing
// ============================================================================

#[test]
fn test_write_artifact_creates_namespace_directories() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = emit(&shape_module());

    let path = write_artifact(&artifact, dir.path(), false).unwrap();
    assert_eq!(path, dir.path().join("gfx").join("Shape.bsc"));
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(BytecodeArtifact::decode(&bytes).unwrap(), artifact);
    assert!(!dir.path().join("gfx").join("Shape.bsa").exists());
}

#[test]
fn test_write_artifact_with_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = emit(&shape_module());

    write_artifact(&artifact, dir.path(), true).unwrap();
    let listing = std::fs::read_to_string(dir.path().join("gfx").join("Shape.bsa")).unwrap();
    assert!(listing.starts_with(".module gfx:Shape\n"));
    assert!(listing.contains("    .field fill gfx:Color\n"));
    assert!(listing.contains(".const Default gfx:Color 1\n"));
}
