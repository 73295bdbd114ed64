//! Loader wrapper
//!
//! The wrapper is a small JSON manifest emitted next to the compiler binary.
//! It names the binary and the exports the host should call; its `default`
//! entry is the construction function.
//!
//! ```json
//! {
//!   "binary": "transpose_wasm.wasm",
//!   "exports": { "default": "rhythm_init", "compile": "compile" }
//! }
//! ```

use crate::abi::ModuleExports;
use crate::classify::{classify_load_error, LoadError};
use crate::engine::{CompilerEngine, WasmModuleFactory};
use crate::environment;
use crate::loader::{FactoryProvider, ModuleFactory};
use crate::locator::ContentLocator;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Parsed loader wrapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperManifest {
    #[serde(default = "default_binary")]
    pub binary: String,
    pub exports: ModuleExports,
}

fn default_binary() -> String {
    String::from("transpose_wasm.wasm")
}

impl WrapperManifest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Name of the construction function, or why there is none
    pub fn construction_function(&self) -> Result<&str, String> {
        match self.exports.construct.as_deref() {
            None => Err(String::from("expected a default export naming the construction function")),
            Some(name) if is_export_name(name) => Ok(name),
            Some(name) => Err(format!("default export {:?} is not a function name", name)),
        }
    }
}

fn is_export_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Reads the wrapper from disk and turns it into a [`WasmModuleFactory`]
#[derive(Debug, Clone)]
pub struct WrapperFactoryProvider {
    wrapper: String,
}

impl WrapperFactoryProvider {
    pub fn new(wrapper: impl Into<String>) -> Self {
        Self {
            wrapper: wrapper.into(),
        }
    }
}

#[async_trait]
impl FactoryProvider for WrapperFactoryProvider {
    async fn acquire(&self, locator: &ContentLocator) -> Result<Arc<dyn ModuleFactory>, LoadError> {
        let location = locator.locate(&self.wrapper);

        let script = environment::current().document.map(|document| {
            let mut script = document.create_element("script");
            script.set_attribute("type", "application/json");
            script.set_src(location.url.clone());
            document.append_to_body(&script);
            script
        });
        debug!(src = script.as_ref().and_then(|s| s.src()).unwrap_or(&location.url), "loading loader wrapper");

        let text = tokio::fs::read_to_string(&location.path)
            .await
            .with_context(|| format!("failed to load loader wrapper {}", location))
            .map_err(classify_load_error)?;

        let manifest = WrapperManifest::parse(&text).map_err(|err| LoadError::MalformedLoader {
            path: location.url.clone(),
            reason: err.to_string(),
        })?;
        let construct = manifest
            .construction_function()
            .map_err(|reason| LoadError::MalformedLoader {
                path: location.url.clone(),
                reason,
            })?
            .to_string();

        let engine = CompilerEngine::new().map_err(classify_load_error)?;
        Ok(Arc::new(WasmModuleFactory::new(
            engine,
            manifest.binary,
            manifest.exports,
            construct,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = WrapperManifest::parse(
            r#"{
                "binary": "transpose_wasm.wasm",
                "exports": {
                    "default": "rhythm_init",
                    "compile": "compile",
                    "compileUserCodeOnly": "compile_user_code_only",
                    "setNoLoop": "set_no_loop",
                    "lastError": "rhythm_last_error"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.binary, "transpose_wasm.wasm");
        assert_eq!(manifest.construction_function(), Ok("rhythm_init"));
        assert_eq!(manifest.exports.last_error.as_deref(), Some("rhythm_last_error"));
    }

    #[test]
    fn test_binary_defaults() {
        let manifest = WrapperManifest::parse(r#"{ "exports": { "default": "boot" } }"#).unwrap();
        assert_eq!(manifest.binary, "transpose_wasm.wasm");
        assert_eq!(manifest.exports.alloc, "rhythm_alloc");
    }

    #[test]
    fn test_missing_or_invalid_construction_function() {
        let missing = WrapperManifest::parse(r#"{ "exports": {} }"#).unwrap();
        assert!(missing.construction_function().is_err());

        let blank = WrapperManifest::parse(r#"{ "exports": { "default": "" } }"#).unwrap();
        assert!(blank.construction_function().is_err());

        let spaced = WrapperManifest::parse(r#"{ "exports": { "default": "not a fn" } }"#).unwrap();
        assert!(spaced.construction_function().is_err());

        assert!(WrapperManifest::parse(r#"{ "binary": "x.wasm" }"#).is_err());
    }

    #[tokio::test]
    async fn test_acquire_rejects_malformed_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loader.json"), r#"{ "exports": { "default": 42 } }"#).unwrap();

        let provider = WrapperFactoryProvider::new("loader.json");
        let err = provider
            .acquire(&ContentLocator::new(dir.path(), None))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, LoadError::MalformedLoader { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_acquire_without_default_export() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loader.json"), r#"{ "exports": { "compile": "c" } }"#).unwrap();

        let provider = WrapperFactoryProvider::new("loader.json");
        let err = provider
            .acquire(&ContentLocator::new(dir.path(), Some(String::from("7"))))
            .await
            .err()
            .unwrap();

        match err {
            LoadError::MalformedLoader { path, .. } => assert!(path.ends_with("loader.json?v=7")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acquire_missing_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let provider = WrapperFactoryProvider::new("transpose_wasm.loader.json");

        let err = provider
            .acquire(&ContentLocator::new(dir.path(), None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::DynamicImport { .. }));
    }

    #[tokio::test]
    async fn test_acquire_valid_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("loader.json"),
            r#"{ "binary": "compiler.wasm", "exports": { "default": "rhythm_init" } }"#,
        )
        .unwrap();

        let provider = WrapperFactoryProvider::new("loader.json");
        assert!(provider.acquire(&ContentLocator::new(dir.path(), None)).await.is_ok());
    }
}
