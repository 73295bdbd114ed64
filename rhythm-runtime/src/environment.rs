//! Ambient environment stand-ins
//!
//! The compiler's loader expects a handful of browser-shaped objects to exist
//! before it runs: a global self reference, a document with a current script,
//! a location, a navigator and a crypto provider. Outside a browser none of
//! these exist, so this module keeps a process-wide registry of minimal
//! stand-ins and projects them into every JavaScript realm the harness creates.
//!
//! Installation only fills gaps. A host that registered its own object through
//! [`with_environment_mut`] keeps it.

use crate::locator::file_url;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rquickjs::{Ctx, Function, Object, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// `document.readyState` of the stand-in; the loader only ever sees a loaded page
pub const READY_STATE: &str = "complete";

/// Descriptor of the script currently being evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub src: String,
}

/// Type-specific fields of an inert element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Script { src: String },
    Link { rel: String, href: String },
    Other,
}

/// An element created by the document stand-in. Every mutation besides the
/// type-specific fields is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    kind: ElementKind,
}

impl Element {
    fn new(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        let kind = match tag.as_str() {
            "script" => ElementKind::Script { src: String::new() },
            "link" => ElementKind::Link {
                rel: String::new(),
                href: String::new(),
            },
            _ => ElementKind::Other,
        };
        Self { tag, kind }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn set_attribute(&mut self, _name: &str, _value: &str) {}

    pub fn add_event_listener(&mut self, _event: &str) {}

    pub fn remove(&mut self) {}

    pub fn src(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Script { src } => Some(src),
            _ => None,
        }
    }

    /// Set the source of a script element; ignored for other tags
    pub fn set_src(&mut self, value: impl Into<String>) {
        if let ElementKind::Script { src } = &mut self.kind {
            *src = value.into();
        }
    }

    pub fn href(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Link { href, .. } => Some(href),
            _ => None,
        }
    }

    /// Set relation and target of a link element; ignored for other tags
    pub fn set_link(&mut self, relation: impl Into<String>, target: impl Into<String>) {
        if let ElementKind::Link { rel, href } = &mut self.kind {
            *rel = relation.into();
            *href = target.into();
        }
    }
}

/// Document stand-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub current_script: Option<ScriptDescriptor>,
}

impl Document {
    pub fn new(module_url: impl Into<String>) -> Self {
        Self {
            current_script: Some(ScriptDescriptor {
                src: module_url.into(),
            }),
        }
    }

    pub fn create_element(&self, tag: &str) -> Element {
        Element::new(tag)
    }

    pub fn get_elements_by_tag_name(&self, _tag: &str) -> Vec<Element> {
        Vec::new()
    }

    pub fn query_selector(&self, _selector: &str) -> Option<Element> {
        None
    }

    pub fn append_to_body(&self, _element: &Element) {}

    pub fn current_script_src(&self) -> Option<&str> {
        self.current_script.as_ref().map(|s| s.src.as_str())
    }
}

/// Location stand-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub href: String,
}

/// Navigator stand-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigator {
    pub user_agent: String,
    pub language: String,
}

impl Default for Navigator {
    fn default() -> Self {
        Self {
            user_agent: format!("rhythm-host/{}", env!("CARGO_PKG_VERSION")),
            language: String::from("en-US"),
        }
    }
}

/// Source of cryptographically secure random bytes
pub trait CryptoProvider: Send + Sync + fmt::Debug {
    /// Fill `dest`, returning false if no randomness is available
    fn fill(&self, dest: &mut [u8]) -> bool;
}

/// Crypto provider backed by the operating system RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsCrypto;

impl OsCrypto {
    /// Returns the provider only when the OS RNG actually works
    pub fn probe() -> Option<Self> {
        let mut probe = [0u8; 1];
        getrandom::getrandom(&mut probe).ok().map(|_| OsCrypto)
    }
}

impl CryptoProvider for OsCrypto {
    fn fill(&self, dest: &mut [u8]) -> bool {
        getrandom::getrandom(dest).is_ok()
    }
}

/// The set of ambient objects visible to the loader and to generated programs
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub global_aliases: Option<Vec<String>>,
    pub document: Option<Document>,
    pub location: Option<Location>,
    pub navigator: Option<Navigator>,
    pub crypto: Option<Arc<dyn CryptoProvider>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a stand-in for every ambient object that is still missing.
    ///
    /// Never fails; a missing crypto provider is left absent.
    pub fn install(&mut self, module_url: &str, asset_dir: &Path) {
        if self.global_aliases.is_none() {
            self.global_aliases = Some(vec![String::from("self"), String::from("window")]);
        }

        match &mut self.document {
            Some(document) => {
                if document.current_script.is_none() {
                    document.current_script = Some(ScriptDescriptor {
                        src: module_url.to_string(),
                    });
                }
            }
            None => self.document = Some(Document::new(module_url)),
        }

        match &mut self.location {
            Some(location) if location.href.is_empty() => {
                location.href = file_url(&asset_dir.join("index.html"));
            }
            Some(_) => {}
            None => {
                self.location = Some(Location {
                    href: file_url(&asset_dir.join("index.html")),
                });
            }
        }

        if self.navigator.is_none() {
            self.navigator = Some(Navigator::default());
        }

        if self.crypto.is_none() {
            self.crypto = OsCrypto::probe().map(|c| Arc::new(c) as Arc<dyn CryptoProvider>);
        }
    }

    pub fn is_installed(&self) -> bool {
        self.global_aliases.is_some()
            && self.document.is_some()
            && self.location.is_some()
            && self.navigator.is_some()
    }
}

static ENVIRONMENT: Lazy<RwLock<Environment>> = Lazy::new(|| RwLock::new(Environment::new()));

/// Install the process-wide ambient environment. Idempotent.
pub fn install_environment(module_url: &str, asset_dir: &Path) {
    let mut env = ENVIRONMENT.write();
    let was_installed = env.is_installed();
    env.install(module_url, asset_dir);
    if !was_installed {
        tracing::debug!(
            module_url,
            crypto = env.crypto.is_some(),
            "installed ambient environment"
        );
    }
}

/// Snapshot of the process-wide environment
pub fn current() -> Environment {
    ENVIRONMENT.read().clone()
}

/// Register host-provided ambient objects before installation
pub fn with_environment_mut<R>(f: impl FnOnce(&mut Environment) -> R) -> R {
    f(&mut ENVIRONMENT.write())
}

const JS_AMBIENT_INSTALLER: &str = r#"
(function (g, opts) {
  const aliases = Array.isArray(opts.aliases) ? opts.aliases : [];
  for (const name of aliases) {
    if (typeof g[name] === 'undefined') g[name] = g;
  }
  if (opts.navigator && typeof g.navigator === 'undefined') {
    g.navigator = { userAgent: opts.navigator.userAgent, language: opts.navigator.language };
  }
  if (opts.locationHref && typeof g.location === 'undefined') {
    g.location = { href: opts.locationHref };
  }
  if (opts.document && typeof g.document === 'undefined') {
    const createElement = (tagName) => {
      const element = { setAttribute() {}, addEventListener() {}, remove() {} };
      const tag = typeof tagName === 'string' ? tagName.toLowerCase() : '';
      if (tag === 'script') element.src = '';
      if (tag === 'link') { element.rel = ''; element.href = ''; }
      return element;
    };
    g.document = {
      currentScript: opts.document.moduleUrl ? { src: opts.document.moduleUrl } : null,
      readyState: opts.document.readyState,
      body: { appendChild() {} },
      createElement,
      getElementsByTagName: () => [],
      querySelector: () => null,
    };
  }
  if (typeof g.console === 'undefined') {
    const text = (args) => args.map((value) => String(value)).join(' ');
    g.console = {
      log: (...args) => opts.log('log', text(args)),
      info: (...args) => opts.log('info', text(args)),
      warn: (...args) => opts.log('warn', text(args)),
      error: (...args) => opts.log('error', text(args)),
    };
  }
})
"#;

/// Project an environment into a QuickJS realm, skipping globals that exist.
///
/// The projected `console` goes to the host log. Generated programs write
/// their output to the I/O channel themselves.
pub fn install_js_globals(ctx: &Ctx<'_>, env: &Environment) -> rquickjs::Result<()> {
    let installer: Function = ctx.eval(JS_AMBIENT_INSTALLER)?;
    let opts = Object::new(ctx.clone())?;

    opts.set("aliases", env.global_aliases.clone().unwrap_or_default())?;
    opts.set("log", Function::new(ctx.clone(), forward_console)?)?;

    if let Some(navigator) = &env.navigator {
        let nav = Object::new(ctx.clone())?;
        nav.set("userAgent", navigator.user_agent.as_str())?;
        nav.set("language", navigator.language.as_str())?;
        opts.set("navigator", nav)?;
    }

    if let Some(location) = &env.location {
        opts.set("locationHref", location.href.as_str())?;
    }

    if let Some(document) = &env.document {
        let doc = Object::new(ctx.clone())?;
        if let Some(src) = document.current_script_src() {
            doc.set("moduleUrl", src)?;
        }
        doc.set("readyState", READY_STATE)?;
        opts.set("document", doc)?;
    }

    let _: Value = installer.call((ctx.globals(), opts))?;
    Ok(())
}

fn forward_console(method: String, line: String) {
    tracing::debug!(target: "rhythm::console", %method, "{}", line);
}
