//! Rhythm Runtime - host for the Rhythm-to-JavaScript compiler
//!
//! This crate loads the externally built Rhythm compiler (a WebAssembly binary
//! described by a small loader wrapper), runs the JavaScript it generates and
//! presents that output to a playground. It includes:
//!
//! - **Environment**: Process-wide stand-ins for the ambient objects the loader expects
//! - **Loader**: Memoized, single-flight instantiation of the compiler module
//! - **Harness**: Sandboxed execution of generated programs with captured I/O
//! - **Extractor**: Recovery of the user's statements from a generated program
//! - **Session**: The playground's "Compile" and "Compile & Run" flows
//!
//! ## Architecture
//!
//! The environment is installed once, before the loader's first attempt. The
//! loader then produces a ready [`CompilerModule`], which two independent
//! consumers use:
//!
//! 1. **Harness**: runs the compiled text in a fresh QuickJS realm
//! 2. **Extractor**: strips the runtime preamble and core library for display
//!
//! ## Example
//!
//! ```rust,no_run
//! use rhythm_runtime::{CompileRequest, HostConfig, Playground};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = HostConfig::load_or_default("rhythm.yml")?;
//! let playground = Playground::from_config(&config);
//!
//! let report = playground
//!     .compile(&CompileRequest::new("print(\"Hello, Rhythm!\");\n").and_run(""))
//!     .await?;
//! println!("{}", report.run.map(|r| r.stdout).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure modes
//!
//! Load failures are classified into [`LoadError`] variants. A wrapper that
//! is out of sync with its binary surfaces as `LinkMismatch` with a rebuild
//! hint; a wrapper that cannot be read surfaces as `DynamicImport` with a
//! cache hint. A failed load is never cached.
//!
//! ## Safety
//!
//! The compiler module runs inside wasmtime with:
//!
//! - Memory limits (default: 256MB)
//! - Table limits (default: 100000 elements)
//!
//! Generated programs optionally run with a heap limit and a wall-clock budget.

pub mod abi;
pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod environment;
pub mod extract;
pub mod harness;
pub mod host;
pub mod loader;
pub mod locator;
pub mod session;
pub mod wrapper;

// Re-export main types
pub use abi::{CompilerModule, ModuleExports, RuntimeError, RuntimeLimits, RuntimeResult};

pub use classify::{classify_load_error, LoadError};

pub use config::{ConfigError, HostConfig};

pub use diagnostics::{DiagnosticCollector, DiagnosticSink, DiagnosticStream, TracingSink};

pub use engine::{CompilerEngine, WasmCompilerModule, WasmModuleFactory};

pub use environment::{install_environment, Environment};

pub use extract::{extract_with_baseline, DiffExtractor};

pub use harness::{normalize_input, ExecutionHarness, HarnessError, IoChannel, RunOutcome, RunStatus, IO_CHANNEL_GLOBAL};

pub use loader::{FactoryProvider, LoadResult, LoadState, LoaderSettings, ModuleFactory, ModuleLoader, ModuleOptions};

pub use locator::{AssetLocation, ContentLocator};

pub use session::{CompileReport, CompileRequest, Playground, PlaygroundError, Status, Tone};

pub use wrapper::{WrapperFactoryProvider, WrapperManifest};

#[cfg(test)]
mod tests;
