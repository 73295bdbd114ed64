//! WASM engine for the Rhythm compiler module
//!
//! This module provides the wasmtime-based side of the loader: it links the
//! ambient host imports, compiles and instantiates the compiler binary, runs
//! its construction function and exposes the result as a [`CompilerModule`].

use crate::abi::{
    self, CompilerModule, ModuleExports, RuntimeError, RuntimeResult, HOST_IMPORT_MODULE,
    IMPORT_PRINT, IMPORT_PRINT_ERR, IMPORT_RANDOM_FILL,
};
use crate::diagnostics::DiagnosticStream;
use crate::environment;
use crate::host::ModuleHost;
use crate::loader::{ModuleFactory, ModuleOptions};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use wasmtime::*;

/// Wasmtime engine configured for the compiler binary
#[derive(Clone)]
pub struct CompilerEngine {
    engine: Engine,
}

impl CompilerEngine {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_multi_memory(false);
        config.wasm_bulk_memory(true);

        let engine = Engine::new(&config)?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Linker with every ambient host import registered. `memory` is the
    /// export the imports read from and write to.
    pub fn linker(&self, memory: &str) -> Result<Linker<ModuleHost>> {
        let mut linker = Linker::new(&self.engine);
        Self::register_print_imports(&mut linker, memory)?;
        Self::register_crypto_imports(&mut linker, memory)?;
        Ok(linker)
    }

    fn register_print_imports(linker: &mut Linker<ModuleHost>, memory: &str) -> Result<()> {
        for (name, stream) in [
            (IMPORT_PRINT, DiagnosticStream::Stdout),
            (IMPORT_PRINT_ERR, DiagnosticStream::Stderr),
        ] {
            let memory = memory.to_string();
            // env::print(ptr, len) / env::print_err(ptr, len)
            linker.func_wrap(
                HOST_IMPORT_MODULE,
                name,
                move |mut caller: Caller<'_, ModuleHost>, ptr: i32, len: i32| {
                    if let Some(bytes) = read_guest(&mut caller, &memory, ptr, len) {
                        caller.data().print(stream, &bytes);
                    }
                },
            )?;
        }
        Ok(())
    }

    fn register_crypto_imports(linker: &mut Linker<ModuleHost>, memory: &str) -> Result<()> {
        let memory = memory.to_string();
        // env::random_fill(ptr, len) -> 0 | -1
        linker.func_wrap(
            HOST_IMPORT_MODULE,
            IMPORT_RANDOM_FILL,
            move |mut caller: Caller<'_, ModuleHost>, ptr: i32, len: i32| -> i32 {
                let Some(mem) = guest_memory(&mut caller, &memory) else {
                    return -1;
                };
                let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
                    return -1;
                };

                let mut buf = vec![0u8; len];
                if !caller.data().random_fill(&mut buf) {
                    return -1;
                }
                match mem.write(&mut caller, start, &buf) {
                    Ok(()) => 0,
                    Err(_) => -1,
                }
            },
        )?;
        Ok(())
    }
}

fn guest_memory(caller: &mut Caller<'_, ModuleHost>, name: &str) -> Option<Memory> {
    match caller.get_export(name) {
        Some(Extern::Memory(m)) => Some(m),
        _ => None,
    }
}

fn read_guest(caller: &mut Caller<'_, ModuleHost>, memory: &str, ptr: i32, len: i32) -> Option<Vec<u8>> {
    let mem = guest_memory(caller, memory)?;
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    mem.data(&*caller).get(start..end).map(<[u8]>::to_vec)
}

/// Fail the way an instantiation does when the construction export is unusable
fn ensure_function_export(module: &Module, name: &str) -> Result<()> {
    match module.get_export(name) {
        Some(ExternType::Func(_)) => Ok(()),
        Some(_) => Err(anyhow!("export `{}` is not a function", name)),
        None => Err(anyhow!("export `{}` is missing from the compiler binary", name)),
    }
}

/// Factory for a compiler binary described by a loader wrapper
pub struct WasmModuleFactory {
    engine: CompilerEngine,
    binary: String,
    exports: ModuleExports,
    construct: String,
}

impl WasmModuleFactory {
    pub fn new(engine: CompilerEngine, binary: impl Into<String>, exports: ModuleExports, construct: impl Into<String>) -> Self {
        Self {
            engine,
            binary: binary.into(),
            exports,
            construct: construct.into(),
        }
    }

    /// Compile, link and construct a module from raw bytes
    pub fn instantiate(&self, bytes: &[u8], options: &ModuleOptions) -> Result<WasmCompilerModule> {
        let module = Module::new(self.engine.engine(), bytes).context("failed to compile compiler binary")?;
        ensure_function_export(&module, &self.construct)?;

        let crypto = environment::current().crypto;
        let host = ModuleHost::new(options.diagnostics.clone(), crypto, options.limits.clone());
        let mut store = Store::new(self.engine.engine(), host);

        // Enforce resource limits
        store.limiter(|host| host as &mut dyn ResourceLimiter);

        let linker = self.engine.linker(&self.exports.memory)?;
        let instance = linker.instantiate(&mut store, &module)?;

        let init = instance.get_typed_func::<(), ()>(&mut store, &self.construct)?;
        init.call(&mut store, ())
            .with_context(|| format!("construction function `{}` trapped", self.construct))?;

        WasmCompilerModule::new(store, instance, self.exports.clone())
    }
}

#[async_trait]
impl ModuleFactory for WasmModuleFactory {
    async fn construct(&self, options: ModuleOptions) -> Result<Arc<dyn CompilerModule>> {
        let location = options.locate(&self.binary);

        if let Some(document) = environment::current().document {
            let mut preload = document.create_element("link");
            preload.set_link("preload", location.url.clone());
            document.append_to_body(&preload);
        }

        debug!(url = %location, "fetching compiler binary");
        let bytes = tokio::fs::read(&location.path)
            .await
            .with_context(|| format!("failed to fetch compiler binary {}", location))?;

        let module = self.instantiate(&bytes, &options)?;
        Ok(Arc::new(module))
    }
}

struct ModuleState {
    store: Store<ModuleHost>,
    instance: Instance,
}

/// An instantiated compiler. Calls are serialized on an internal lock.
pub struct WasmCompilerModule {
    state: Mutex<ModuleState>,
    exports: ModuleExports,
}

impl WasmCompilerModule {
    fn new(mut store: Store<ModuleHost>, instance: Instance, exports: ModuleExports) -> Result<Self> {
        if instance.get_memory(&mut store, &exports.memory).is_none() {
            return Err(anyhow!("export `{}` is missing from the compiler binary", exports.memory));
        }
        Ok(Self {
            state: Mutex::new(ModuleState { store, instance }),
            exports,
        })
    }

    /// Pass `source` to a `(ptr, len) -> packed` export and read the result
    fn call_text(&self, export: &str, source: &str) -> RuntimeResult<String> {
        let mut state = self.state.lock();
        let ModuleState { store, instance } = &mut *state;

        let memory = instance
            .get_memory(&mut *store, &self.exports.memory)
            .ok_or_else(|| RuntimeError::MissingExport(self.exports.memory.clone()))?;

        let input = source.as_bytes();
        let len = i32::try_from(input.len()).map_err(|_| RuntimeError::InputTooLarge(input.len()))?;

        let alloc = instance
            .get_typed_func::<i32, i32>(&mut *store, &self.exports.alloc)
            .map_err(|_| RuntimeError::MissingExport(self.exports.alloc.clone()))?;
        let ptr = alloc.call(&mut *store, len)?;

        memory
            .write(&mut *store, ptr as u32 as usize, input)
            .map_err(|_| RuntimeError::OutOfBounds {
                ptr: ptr as u32,
                len: len as u32,
            })?;

        let func = instance
            .get_typed_func::<(i32, i32), i64>(&mut *store, export)
            .map_err(|_| RuntimeError::MissingExport(export.to_string()))?;
        let packed = func.call(&mut *store, (ptr, len))?;

        if let Some(free) = &self.exports.free {
            if let Ok(free) = instance.get_typed_func::<(i32, i32), ()>(&mut *store, free) {
                free.call(&mut *store, (ptr, len))?;
            }
        }

        match abi::unpack_slice(packed) {
            Some((out_ptr, out_len)) => read_text(&memory, &*store, out_ptr, out_len),
            None => Err(RuntimeError::CompileFailed(self.last_error(store, instance, &memory))),
        }
    }

    fn last_error(&self, store: &mut Store<ModuleHost>, instance: &Instance, memory: &Memory) -> String {
        const UNKNOWN: &str = "the compiler reported an error without a message";

        let Some(name) = &self.exports.last_error else {
            return UNKNOWN.to_string();
        };
        let Ok(func) = instance.get_typed_func::<(), i64>(&mut *store, name) else {
            return UNKNOWN.to_string();
        };
        match func.call(&mut *store, ()).ok().and_then(abi::unpack_slice) {
            Some((ptr, len)) => read_text(memory, &*store, ptr, len).unwrap_or_else(|_| UNKNOWN.to_string()),
            None => UNKNOWN.to_string(),
        }
    }
}

fn read_text(memory: &Memory, store: &Store<ModuleHost>, ptr: u32, len: u32) -> RuntimeResult<String> {
    let start = ptr as usize;
    let bytes = memory
        .data(store)
        .get(start..start + len as usize)
        .ok_or(RuntimeError::OutOfBounds { ptr, len })?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

impl CompilerModule for WasmCompilerModule {
    fn compile(&self, source: &str) -> RuntimeResult<String> {
        self.call_text(&self.exports.compile, source)
    }

    fn compile_user_code_only(&self, source: &str) -> RuntimeResult<String> {
        self.call_text(&self.exports.compile_user_code_only, source)
    }

    fn set_no_loop(&self, enabled: bool) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        let ModuleState { store, instance } = &mut *state;

        let func = instance
            .get_typed_func::<i32, ()>(&mut *store, &self.exports.set_no_loop)
            .map_err(|_| RuntimeError::MissingExport(self.exports.set_no_loop.clone()))?;
        func.call(&mut *store, i32::from(enabled))?;
        Ok(())
    }
}
