//! Memoized compiler loading
//!
//! `ModuleLoader` turns the loader wrapper and binary on disk into a ready
//! [`CompilerModule`]. Both the factory acquisition and the module
//! construction are memoized as shared pending results: any number of
//! concurrent callers observe a single attempt, and a failed attempt clears its
//! memo so the next call starts over.

use crate::abi::{CompilerModule, RuntimeLimits};
use crate::classify::{classify_load_error, LoadError};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::environment;
use crate::locator::{file_url, AssetLocation, ContentLocator};
use crate::wrapper::WrapperFactoryProvider;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Load failures are shared between every caller that awaited the attempt
pub type LoadResult<T> = Result<T, Arc<LoadError>>;

/// Resolves an asset name requested by the compiler to its location
pub type LocateFile = Arc<dyn Fn(&str) -> AssetLocation + Send + Sync>;

/// Options handed to a factory when it constructs a module
#[derive(Clone)]
pub struct ModuleOptions {
    pub locate_file: LocateFile,
    pub diagnostics: Option<Arc<dyn DiagnosticSink>>,
    pub limits: RuntimeLimits,
}

impl ModuleOptions {
    pub fn locate(&self, name: &str) -> AssetLocation {
        (self.locate_file)(name)
    }
}

impl fmt::Debug for ModuleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleOptions")
            .field("diagnostics", &self.diagnostics.is_some())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Constructs ready compiler modules
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    async fn construct(&self, options: ModuleOptions) -> anyhow::Result<Arc<dyn CompilerModule>>;
}

/// Acquires a module factory, typically by loading the loader wrapper
#[async_trait]
pub trait FactoryProvider: Send + Sync {
    async fn acquire(&self, locator: &ContentLocator) -> Result<Arc<dyn ModuleFactory>, LoadError>;
}

/// Where the loader is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Static inputs of the loader
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Directory holding the wrapper and binary. When empty, the directory
    /// is derived from the ambient document and location.
    pub asset_dir: PathBuf,
    /// File name of the loader wrapper
    pub wrapper: String,
    /// Cache-busting token appended to asset URLs
    pub build_version: Option<String>,
    /// Prefix of forwarded module diagnostics
    pub log_prefix: String,
    pub limits: RuntimeLimits,
}

impl LoaderSettings {
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            ..Self::default()
        }
    }

    /// URL the wrapper is known by, used as the document's current script
    pub fn module_url(&self) -> String {
        file_url(&self.asset_dir.join(&self.wrapper))
    }

    /// Locator for the wrapper and its assets
    pub fn locator(&self) -> ContentLocator {
        if self.asset_dir.as_os_str().is_empty() {
            let fallback = std::env::current_dir().unwrap_or_default();
            ContentLocator::from_environment(
                &environment::current(),
                &fallback,
                self.build_version.clone(),
            )
        } else {
            ContentLocator::new(self.asset_dir.clone(), self.build_version.clone())
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("build/web"),
            wrapper: String::from("transpose_wasm.loader.json"),
            build_version: None,
            log_prefix: String::from("transpose-wasm"),
            limits: RuntimeLimits::default(),
        }
    }
}

type Pending<T> = Shared<BoxFuture<'static, LoadResult<T>>>;

/// A single memo slot. Each started attempt gets a generation so that a
/// finished attempt only ever clears its own entry.
struct Memo<T: Clone> {
    slot: Mutex<Option<(u64, Pending<T>)>>,
    generations: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Memo<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Return the pending attempt, starting one with `start` if there is none
    fn get_or_start(
        &self,
        start: impl FnOnce(u64) -> BoxFuture<'static, LoadResult<T>>,
    ) -> Pending<T> {
        let mut slot = self.slot.lock();
        if let Some((_, pending)) = slot.as_ref() {
            return pending.clone();
        }
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let pending = start(generation).shared();
        *slot = Some((generation, pending.clone()));
        pending
    }

    fn evict(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
            *slot = None;
        }
    }

    fn clear(&self) {
        self.slot.lock().take();
    }
}

struct LoaderInner {
    settings: LoaderSettings,
    provider: Arc<dyn FactoryProvider>,
    diagnostics: Arc<dyn DiagnosticSink>,
    factory: Memo<Arc<dyn ModuleFactory>>,
    module: Memo<Arc<dyn CompilerModule>>,
    state: Mutex<LoadState>,
    attempts: AtomicUsize,
}

/// Lazily loads the compiler, at most one attempt in flight at a time.
///
/// Cloning is cheap and clones share the memoized module.
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<LoaderInner>,
}

impl ModuleLoader {
    /// Loader reading the wrapper named in `settings` from disk
    pub fn new(settings: LoaderSettings) -> Self {
        let provider = Arc::new(WrapperFactoryProvider::new(settings.wrapper.clone()));
        Self::with_provider(settings, provider)
    }

    pub fn with_provider(settings: LoaderSettings, provider: Arc<dyn FactoryProvider>) -> Self {
        let diagnostics = Arc::new(TracingSink::new(settings.log_prefix.clone()));
        Self::from_parts(settings, provider, diagnostics)
    }

    pub fn from_parts(
        settings: LoaderSettings,
        provider: Arc<dyn FactoryProvider>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                settings,
                provider,
                diagnostics,
                factory: Memo::new(),
                module: Memo::new(),
                state: Mutex::new(LoadState::Unloaded),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> LoadState {
        *self.inner.state.lock()
    }

    /// Number of module construction attempts started so far
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Acquire the module factory, memoized until an attempt fails
    pub async fn get_factory(&self) -> LoadResult<Arc<dyn ModuleFactory>> {
        self.inner.get_factory().await
    }

    /// Get the ready compiler module, constructing it on first use
    pub async fn get_module(&self) -> LoadResult<Arc<dyn CompilerModule>> {
        self.inner.get_module().await
    }
}

impl LoaderInner {
    async fn get_factory(self: &Arc<Self>) -> LoadResult<Arc<dyn ModuleFactory>> {
        let pending = self.factory.get_or_start(|generation| {
            let inner = Arc::clone(self);
            async move { inner.acquire_factory(generation).await }.boxed()
        });
        pending.await
    }

    async fn acquire_factory(self: Arc<Self>, generation: u64) -> LoadResult<Arc<dyn ModuleFactory>> {
        let locator = self.settings.locator();
        debug!(wrapper = %self.settings.wrapper, base = %locator.base_dir().display(), "acquiring compiler factory");

        let result = self.provider.acquire(&locator).await.map_err(Arc::new);
        if result.is_err() {
            self.factory.evict(generation);
        }
        result
    }

    async fn get_module(self: &Arc<Self>) -> LoadResult<Arc<dyn CompilerModule>> {
        let pending = self.module.get_or_start(|generation| {
            *self.state.lock() = LoadState::Loading;
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(self);
            async move { inner.instantiate(generation).await }.boxed()
        });
        pending.await
    }

    async fn instantiate(self: Arc<Self>, generation: u64) -> LoadResult<Arc<dyn CompilerModule>> {
        environment::install_environment(&self.settings.module_url(), &self.settings.asset_dir);

        let result = match self.get_factory().await {
            Ok(factory) => factory
                .construct(self.module_options())
                .await
                .map_err(|err| Arc::new(classify_load_error(err))),
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => {
                *self.state.lock() = LoadState::Ready;
                info!(wrapper = %self.settings.wrapper, "compiler module ready");
            }
            Err(err) => {
                self.module.evict(generation);
                self.factory.clear();
                *self.state.lock() = LoadState::Failed;
                warn!(error = %err, "compiler module failed to load");
            }
        }
        result
    }

    fn module_options(&self) -> ModuleOptions {
        let locator = self.settings.locator();
        ModuleOptions {
            locate_file: Arc::new(move |name: &str| locator.locate(name)),
            diagnostics: Some(Arc::clone(&self.diagnostics)),
            limits: self.settings.limits.clone(),
        }
    }
}
