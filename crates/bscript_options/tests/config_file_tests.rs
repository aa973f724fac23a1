use std::fs;
use std::path::Path;

use bscript_options::{find_project_file, parse_config_file, ConfigError};
use pretty_assertions::assert_eq;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_relative_paths_resolve_against_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "proj/bscript.json", r#"{ "sources": ["src"], "outDir": "out" }"#);

    let config = parse_config_file(&dir.path().join("proj/bscript.json")).unwrap();
    let expected_src = dir.path().join("proj").join("src").to_string_lossy().into_owned();
    assert_eq!(config.sources, Some(vec![expected_src]));
    assert!(config.out_dir.unwrap().ends_with("out"));
}

#[test]
fn test_extends_fills_unset_options() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "base.json",
        r#"{ "imports": ["lib"], "compilerOptions": { "workers": 8, "emitAssembly": true } }"#,
    );
    write(
        dir.path(),
        "app/bscript.json",
        r#"{ "extends": "../base.json", "sources": ["src"], "compilerOptions": { "workers": 2 } }"#,
    );

    let config = parse_config_file(&dir.path().join("app/bscript.json")).unwrap();
    let options = config.compiler_options();
    assert_eq!(options.workers, Some(2));
    assert_eq!(options.emit_assembly, Some(true));
    let imports = config.imports.unwrap();
    assert_eq!(imports.len(), 1);
    assert!(Path::new(&imports[0]).ends_with("lib"));
}

#[test]
fn test_circular_extends_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.json", r#"{ "extends": "b.json" }"#);
    write(dir.path(), "b.json", r#"{ "extends": "a.json" }"#);

    let err = parse_config_file(&dir.path().join("a.json")).unwrap_err();
    assert!(matches!(err, ConfigError::CircularExtends { .. }));
}

#[test]
fn test_missing_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    let err = parse_config_file(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));

    write(dir.path(), "bad.json", "{ sources: }");
    let err = parse_config_file(&dir.path().join("bad.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Json { .. }));
    assert!(err.to_string().contains("bad.json"));
}

#[test]
fn test_find_project_file() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(find_project_file(dir.path()), None);
    write(dir.path(), "bscript.json", "{}");
    assert_eq!(find_project_file(dir.path()), Some(dir.path().join("bscript.json")));
    assert_eq!(
        find_project_file(&dir.path().join("bscript.json")),
        Some(dir.path().join("bscript.json"))
    );
}
