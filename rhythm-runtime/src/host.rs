//! Host state behind the compiler module's imports
//!
//! One `ModuleHost` lives in the wasmtime store of each instantiated compiler.
//! It carries the diagnostic sink, the ambient crypto provider and the
//! resource limits enforced while the module grows its memory.

use crate::abi::RuntimeLimits;
use crate::diagnostics::{DiagnosticSink, DiagnosticStream};
use crate::environment::CryptoProvider;
use std::sync::Arc;
use wasmtime::ResourceLimiter;

pub struct ModuleHost {
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    crypto: Option<Arc<dyn CryptoProvider>>,
    limits: RuntimeLimits,
}

impl ModuleHost {
    pub fn new(
        diagnostics: Option<Arc<dyn DiagnosticSink>>,
        crypto: Option<Arc<dyn CryptoProvider>>,
        limits: RuntimeLimits,
    ) -> Self {
        Self {
            diagnostics,
            crypto,
            limits,
        }
    }

    /// Forward raw text written by the module, one sink call per line
    pub fn print(&self, stream: DiagnosticStream, bytes: &[u8]) {
        let Some(sink) = &self.diagnostics else {
            return;
        };
        let text = String::from_utf8_lossy(bytes);
        for line in text.lines() {
            sink.emit(stream, line);
        }
    }

    /// Fill `dest` from the crypto provider; false when none is installed
    pub fn random_fill(&self, dest: &mut [u8]) -> bool {
        match &self.crypto {
            Some(provider) => provider.fill(dest),
            None => false,
        }
    }
}

impl ResourceLimiter for ModuleHost {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= self.limits.max_module_memory)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= self.limits.max_table_elements)
    }
}
