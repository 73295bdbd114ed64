//! Load failure classification
//!
//! Instantiation errors only carry a message, so the two recoverable failure
//! modes are recognized by matching that message. The patterns are
//! best-effort: they follow engine-specific phrasing and may need revisiting
//! when wasmtime (or the wrapper) changes its wording.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Remediation for a wrapper/binary import mismatch
pub const LINK_MISMATCH_HINT: &str = "The WebAssembly wrapper and binary appear to be out of sync. \
     Rebuild the binary artifact (emcmake cmake && ninja transpose_wasm).";

/// Remediation for a wrapper that failed to load
pub const DYNAMIC_IMPORT_HINT: &str = "The compiler loader wrapper could not be loaded. \
     Hard-refresh to clear cached assets, or bump the build version.";

static LINK_ERROR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)function import requires a callable",
        r"|WebAssembly\.instantiate.*LinkError",
        r#"|Import #\d+ "env": module is not an object or function"#,
        r"|unknown import: `[^`]*` has not been defined",
        r"|incompatible import type for `[^`]*`",
        r"|export `[^`]*` is (missing|not a function)",
    ))
    .expect("link error pattern compiles")
});

static DYNAMIC_IMPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)failed to fetch dynamically imported module",
        r"|error loading dynamically imported module",
        r"|importing a module script failed",
        r"|failed to load loader wrapper",
    ))
    .expect("dynamic import pattern compiles")
});

/// A failed attempt to produce a ready compiler module
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Malformed loader wrapper {path}: {reason}")]
    MalformedLoader { path: String, reason: String },

    #[error("{hint}")]
    LinkMismatch {
        hint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{hint}")]
    DynamicImport {
        hint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Unclassified(anyhow::Error),
}

impl LoadError {
    /// Remediation hint, for the two classified failure modes
    pub fn hint(&self) -> Option<&str> {
        match self {
            LoadError::LinkMismatch { hint, .. } | LoadError::DynamicImport { hint, .. } => Some(hint),
            _ => None,
        }
    }

    /// The error that was rewrapped, if any
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            LoadError::LinkMismatch { source, .. } | LoadError::DynamicImport { source, .. } => {
                Some(source)
            }
            LoadError::Unclassified(source) => Some(source),
            LoadError::MalformedLoader { .. } => None,
        }
    }
}

pub fn is_instantiation_link_error(message: &str) -> bool {
    !message.is_empty() && LINK_ERROR_PATTERN.is_match(message)
}

pub fn is_dynamic_import_error(message: &str) -> bool {
    !message.is_empty() && DYNAMIC_IMPORT_PATTERN.is_match(message)
}

/// Classify an instantiation failure by its full context chain
pub fn classify_load_error(err: anyhow::Error) -> LoadError {
    let message = format!("{:#}", err);
    if is_instantiation_link_error(&message) {
        LoadError::LinkMismatch {
            hint: LINK_MISMATCH_HINT.to_string(),
            source: err,
        }
    } else if is_dynamic_import_error(&message) {
        LoadError::DynamicImport {
            hint: DYNAMIC_IMPORT_HINT.to_string(),
            source: err,
        }
    } else {
        LoadError::Unclassified(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_wasmtime_unknown_import_is_link_error() {
        let err = anyhow!("unknown import: `env::emscripten_notify_memory_growth` has not been defined");
        let classified = classify_load_error(err);

        assert!(matches!(classified, LoadError::LinkMismatch { .. }));
        assert_eq!(classified.hint(), Some(LINK_MISMATCH_HINT));
        assert_eq!(classified.to_string(), LINK_MISMATCH_HINT);
        assert!(classified
            .cause()
            .unwrap()
            .to_string()
            .contains("emscripten_notify_memory_growth"));
    }

    #[test]
    fn test_browser_phrasing_is_link_error() {
        assert!(is_instantiation_link_error(
            "WebAssembly.instantiate(): Import #0 \"env\": module is not an object or function"
        ));
        assert!(is_instantiation_link_error(
            "TypeError: function import requires a callable"
        ));
        assert!(is_instantiation_link_error("export `rhythm_init` is missing from the compiler binary"));
        assert!(!is_instantiation_link_error(""));
    }

    #[test]
    fn test_link_error_found_in_context_chain() {
        let err = anyhow!("incompatible import type for `env::print`")
            .context("failed to instantiate compiler module");
        assert!(matches!(classify_load_error(err), LoadError::LinkMismatch { .. }));
    }

    #[test]
    fn test_wrapper_load_failure_is_dynamic_import() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = anyhow::Error::new(io).context("failed to load loader wrapper file:///w/transpose_wasm.loader.json");
        let classified = classify_load_error(err);

        assert!(matches!(classified, LoadError::DynamicImport { .. }));
        assert_eq!(classified.hint(), Some(DYNAMIC_IMPORT_HINT));
        assert!(std::error::Error::source(&classified).is_some());
    }

    #[test]
    fn test_browser_dynamic_import_phrasing() {
        assert!(is_dynamic_import_error(
            "TypeError: Failed to fetch dynamically imported module: http://localhost/transpose_wasm.js"
        ));
        assert!(is_dynamic_import_error("error loading dynamically imported module"));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let classified = classify_load_error(anyhow!("out of fuel"));
        assert!(matches!(classified, LoadError::Unclassified(_)));
        assert_eq!(classified.to_string(), "out of fuel");
        assert_eq!(classified.hint(), None);
    }
}
