//! Asset location and cache busting
//!
//! Assets are addressed by `file://` URLs so that the loader can reason about
//! them the same way regardless of whether they came from the document's
//! current script, the location, or the configured asset directory.

use crate::environment::Environment;
use std::fmt;
use std::path::{Path, PathBuf};

/// A resolved asset: where to read it from and the URL it is known by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    pub path: PathBuf,
    pub url: String,
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Render a path as a `file://` URL. Relative paths are taken from the
/// current directory.
pub fn file_url(path: &Path) -> String {
    let absolute = match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };
    let rendered = absolute.to_string_lossy().replace('\\', "/");
    if rendered.starts_with('/') {
        format!("file://{}", rendered)
    } else {
        format!("file:///{}", rendered)
    }
}

/// Map a `file://` URL back to a filesystem path, dropping query and fragment
pub fn url_to_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    let path = &rest[..end];
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Directory part of a URL, up to and including the last `/`
pub fn script_directory(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let base = &url[..end];
    base.rfind('/').map(|idx| &base[..=idx])
}

/// Resolves requested asset names relative to the script directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocator {
    base_dir: PathBuf,
    build_version: Option<String>,
}

impl ContentLocator {
    pub fn new(base_dir: impl Into<PathBuf>, build_version: Option<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            build_version: build_version.filter(|v| !v.is_empty()),
        }
    }

    /// Derive the base directory the way a script loader does: from the
    /// current script, then from the location, then from `fallback`.
    pub fn from_environment(env: &Environment, fallback: &Path, build_version: Option<String>) -> Self {
        let from_script = env
            .document
            .as_ref()
            .and_then(|d| d.current_script_src())
            .and_then(script_directory)
            .and_then(url_to_path);
        let from_location = || {
            env.location
                .as_ref()
                .and_then(|l| script_directory(&l.href))
                .and_then(url_to_path)
        };

        let base_dir = from_script
            .or_else(from_location)
            .unwrap_or_else(|| fallback.to_path_buf());
        Self::new(base_dir, build_version)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn build_version(&self) -> Option<&str> {
        self.build_version.as_deref()
    }

    pub fn locate(&self, requested: &str) -> AssetLocation {
        let path = self.base_dir.join(requested);
        let mut url = file_url(&path);
        if let Some(version) = &self.build_version {
            url.push_str("?v=");
            url.push_str(version);
        }
        AssetLocation { path, url }
    }
}
