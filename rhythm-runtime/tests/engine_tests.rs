//! Integration tests for loading and driving the compiler binary

use rhythm_runtime::{
    CompileRequest, DiagnosticCollector, DiagnosticStream, LoadError, LoadState, LoaderSettings,
    ModuleLoader, Playground, RunStatus, RuntimeError, WrapperFactoryProvider,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const COMPILER_WAT: &str = include_str!("fixtures/compiler.wat");
const LOADER_JSON: &str = include_str!("fixtures/transpose_wasm.loader.json");

const HELLO: &str = "print(\"Hello, Rhythm!\");\n";

fn write_binary(dir: &Path, wat: &str) {
    let wasm = wat::parse_str(wat).unwrap();
    std::fs::write(dir.join("transpose_wasm.wasm"), wasm).unwrap();
}

/// Asset directory holding the fixture wrapper and binary
fn asset_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_binary(dir.path(), COMPILER_WAT);
    std::fs::write(dir.path().join("transpose_wasm.loader.json"), LOADER_JSON).unwrap();
    dir
}

fn collecting_loader(dir: &Path) -> (ModuleLoader, Arc<DiagnosticCollector>) {
    let settings = LoaderSettings::new(dir);
    let provider = Arc::new(WrapperFactoryProvider::new(settings.wrapper.clone()));
    let collector = Arc::new(DiagnosticCollector::new());
    let loader = ModuleLoader::from_parts(settings, provider, collector.clone());
    (loader, collector)
}

#[tokio::test]
async fn test_load_and_compile() {
    let dir = asset_dir();
    let (loader, collector) = collecting_loader(dir.path());

    let module = loader.get_module().await.unwrap();
    assert_eq!(loader.state(), LoadState::Ready);
    assert_eq!(collector.lines(DiagnosticStream::Stdout), vec!["transpose ready"]);

    let generated = module.compile(HELLO).unwrap();
    assert!(!generated.is_empty());
    assert!(generated.contains("print(\"Hello, Rhythm!\");"));

    assert_eq!(module.compile_user_code_only(HELLO).unwrap(), HELLO);
    module.set_no_loop(false).unwrap();
}

#[tokio::test]
async fn test_compile_error_reports_last_error() {
    let dir = asset_dir();
    let (loader, collector) = collecting_loader(dir.path());
    let module = loader.get_module().await.unwrap();

    let err = module.compile("@bad").unwrap_err();
    match err {
        RuntimeError::CompileFailed(message) => assert_eq!(message, "unexpected character '@'"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        collector.lines(DiagnosticStream::Stderr),
        vec!["unexpected character '@'"]
    );
}

#[tokio::test]
async fn test_hello_world_end_to_end() {
    let dir = asset_dir();
    let playground = Playground::new(ModuleLoader::new(LoaderSettings::new(dir.path())));

    let report = playground
        .compile(&CompileRequest::new(HELLO).and_run(""))
        .await
        .unwrap();

    assert_eq!(report.user_program, "print(\"Hello, Rhythm!\");");
    let run = report.run.unwrap();
    assert_eq!(run.stdout, "Hello, Rhythm!\n");
    assert_eq!(run.stderr, "");
    assert_eq!(run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_stale_binary_is_link_mismatch() {
    let dir = asset_dir();
    write_binary(
        dir.path(),
        r#"
        (module
          (import "env" "emscripten_notify_memory_growth" (func (param i32)))
          (memory (export "memory") 1)
          (func (export "rhythm_init"))
        )
        "#,
    );
    let loader = ModuleLoader::new(LoaderSettings::new(dir.path()));

    let err = loader.get_module().await.err().unwrap();
    assert!(matches!(*err, LoadError::LinkMismatch { .. }), "got {err:?}");
    assert!(err.to_string().contains("emcmake cmake && ninja transpose_wasm"));
    assert_eq!(loader.state(), LoadState::Failed);
}

#[tokio::test]
async fn test_missing_construction_function_is_link_mismatch() {
    let dir = asset_dir();
    std::fs::write(
        dir.path().join("transpose_wasm.loader.json"),
        r#"{ "exports": { "default": "rhythm_boot" } }"#,
    )
    .unwrap();
    let loader = ModuleLoader::new(LoaderSettings::new(dir.path()));

    let err = loader.get_module().await.err().unwrap();
    assert!(matches!(*err, LoadError::LinkMismatch { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_malformed_wrapper() {
    let dir = asset_dir();
    std::fs::write(dir.path().join("transpose_wasm.loader.json"), "export default 1;").unwrap();
    let loader = ModuleLoader::new(LoaderSettings::new(dir.path()));

    let err = loader.get_module().await.err().unwrap();
    assert!(matches!(*err, LoadError::MalformedLoader { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_failed_load_is_not_cached() {
    let dir = asset_dir();
    std::fs::remove_file(dir.path().join("transpose_wasm.wasm")).unwrap();
    let loader = ModuleLoader::new(LoaderSettings::new(dir.path()));

    let err = loader.get_module().await.err().unwrap();
    assert!(matches!(*err, LoadError::Unclassified(_)), "got {err:?}");
    assert!(format!("{err}").contains("failed to fetch compiler binary"));

    write_binary(dir.path(), COMPILER_WAT);
    let module = loader.get_module().await.unwrap();
    assert!(module.compile(HELLO).is_ok());
    assert_eq!(loader.attempts(), 2);
}

#[tokio::test]
async fn test_build_version_does_not_change_paths() {
    let dir = asset_dir();
    let mut settings = LoaderSettings::new(dir.path());
    settings.build_version = Some(String::from("2024-06-01"));

    let loader = ModuleLoader::new(settings);
    assert!(loader.get_module().await.is_ok());
}
