//! Compiler module ABI
//!
//! This module defines the boundary between the host and the external Rhythm
//! compiler: the `CompilerModule` capability handle, the names the binary is
//! expected to export and import, and the packed slice encoding used to move
//! strings across linear memory.

use serde::{Deserialize, Serialize};

/// Import module name for every ambient host function.
pub const HOST_IMPORT_MODULE: &str = "env";

/// Host import: module stdout line (`ptr`, `len`).
pub const IMPORT_PRINT: &str = "print";

/// Host import: module stderr line (`ptr`, `len`).
pub const IMPORT_PRINT_ERR: &str = "print_err";

/// Host import: fill (`ptr`, `len`) with random bytes, returns 0 or -1.
pub const IMPORT_RANDOM_FILL: &str = "random_fill";

/// Capability handle exposed by an instantiated compiler.
///
/// Implementations must be callable from any thread; the wasmtime-backed
/// module serializes calls internally.
pub trait CompilerModule: Send + Sync {
    /// Compile Rhythm source into a full JavaScript program (runtime preamble,
    /// core library and user code).
    fn compile(&self, source: &str) -> RuntimeResult<String>;

    /// Compile Rhythm source and return only the user's statements.
    fn compile_user_code_only(&self, source: &str) -> RuntimeResult<String>;

    /// Toggle rejection of loop constructs in subsequent compilations.
    fn set_no_loop(&self, enabled: bool) -> RuntimeResult<()>;
}

/// Export names the loader wrapper declares for a binary module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleExports {
    /// The construction function (the wrapper's default export)
    #[serde(rename = "default", default)]
    pub construct: Option<String>,

    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default = "default_alloc")]
    pub alloc: String,

    #[serde(default)]
    pub free: Option<String>,

    #[serde(default = "default_compile")]
    pub compile: String,

    #[serde(rename = "compileUserCodeOnly", default = "default_compile_user_code_only")]
    pub compile_user_code_only: String,

    #[serde(rename = "setNoLoop", default = "default_set_no_loop")]
    pub set_no_loop: String,

    #[serde(rename = "lastError", default)]
    pub last_error: Option<String>,
}

fn default_memory() -> String {
    String::from("memory")
}

fn default_alloc() -> String {
    String::from("rhythm_alloc")
}

fn default_compile() -> String {
    String::from("compile")
}

fn default_compile_user_code_only() -> String {
    String::from("compile_user_code_only")
}

fn default_set_no_loop() -> String {
    String::from("set_no_loop")
}

impl Default for ModuleExports {
    fn default() -> Self {
        Self {
            construct: Some(String::from("rhythm_init")),
            memory: default_memory(),
            alloc: default_alloc(),
            free: Some(String::from("rhythm_free")),
            compile: default_compile(),
            compile_user_code_only: default_compile_user_code_only(),
            set_no_loop: default_set_no_loop(),
            last_error: Some(String::from("rhythm_last_error")),
        }
    }
}

/// Unpack a `(ptr << 32) | len` value. Zero means "no result".
pub fn unpack_slice(packed: i64) -> Option<(u32, u32)> {
    if packed == 0 {
        return None;
    }
    let raw = packed as u64;
    Some(((raw >> 32) as u32, raw as u32))
}

/// Resource limits for the compiler module and for generated programs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Maximum linear memory of the compiler module in bytes (default: 256MB)
    pub max_module_memory: usize,
    /// Maximum table elements of the compiler module (default: 100000)
    pub max_table_elements: usize,
    /// Heap limit for a generated program, unlimited when unset
    pub script_memory_limit: Option<usize>,
    /// Wall-clock budget for a generated program, unlimited when unset
    pub script_timeout_ms: Option<u64>,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_module_memory: 256 * 1024 * 1024,
            max_table_elements: 100_000,
            script_memory_limit: None,
            script_timeout_ms: None,
        }
    }
}

/// Errors raised by calls into a ready compiler module
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Compilation failed: {0}")]
    CompileFailed(String),

    #[error("Module export `{0}` is missing or has the wrong type")]
    MissingExport(String),

    #[error("Source too large for the module ABI: {0} bytes")]
    InputTooLarge(usize),

    #[error("Guest memory access out of bounds at {ptr} (+{len})")]
    OutOfBounds { ptr: u32, len: u32 },

    #[error("Module returned invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("WASM error: {0}")]
    WasmError(String),
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        RuntimeError::WasmError(format!("{err:#}"))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
