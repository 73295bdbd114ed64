//! Playground session
//!
//! Ties the loader, the extractor and the harness together into the two
//! playground actions, "Compile" and "Compile & Run", and renders each outcome
//! as a status line with a tone.

use crate::abi::{CompilerModule, RuntimeError};
use crate::classify::LoadError;
use crate::config::HostConfig;
use crate::extract::DiffExtractor;
use crate::harness::{ExecutionHarness, HarnessError, RunOutcome, RunStatus};
use crate::loader::ModuleLoader;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Info,
    Success,
    Error,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Info => f.write_str("info"),
            Tone::Success => f.write_str("success"),
            Tone::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub tone: Tone,
    pub message: String,
}

impl Status {
    fn new(tone: Tone, message: impl Into<String>) -> Self {
        Self {
            tone,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.tone == Tone::Error
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.tone, self.message)
    }
}

#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("{0}")]
    Load(Arc<LoadError>),

    #[error(transparent)]
    Compile(#[from] RuntimeError),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl From<Arc<LoadError>> for PlaygroundError {
    fn from(err: Arc<LoadError>) -> Self {
        PlaygroundError::Load(err)
    }
}

impl PlaygroundError {
    /// The bare failure message, without the compile prefix
    pub fn message(&self) -> String {
        match self {
            PlaygroundError::Compile(RuntimeError::CompileFailed(message)) => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Status {
        Status::new(Tone::Error, format!("Compilation failed: {}", self.message()))
    }
}

/// Input of one playground action
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub source: String,
    pub stdin: String,
    pub run: bool,
    pub no_loop: bool,
}

impl CompileRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Also run the generated program with `stdin` as its input
    pub fn and_run(mut self, stdin: impl Into<String>) -> Self {
        self.run = true;
        self.stdin = stdin.into();
        self
    }

    pub fn no_loop(mut self, enabled: bool) -> Self {
        self.no_loop = enabled;
        self
    }
}

/// What the playground shows after an action
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    pub generated: String,
    pub user_program: String,
    pub run: Option<RunOutcome>,
    pub status: Status,
}

pub struct Playground {
    loader: ModuleLoader,
    harness: ExecutionHarness,
    extractor: OnceCell<DiffExtractor>,
}

impl Playground {
    pub fn new(loader: ModuleLoader) -> Self {
        let harness = ExecutionHarness::new(loader.settings().limits.clone());
        Self {
            loader,
            harness,
            extractor: OnceCell::new(),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(ModuleLoader::new(config.loader_settings()))
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Start loading the compiler and report readiness
    pub async fn initialize(&self) -> Status {
        match self.loader.get_module().await {
            Ok(_) => Status::new(Tone::Success, "Transpiler ready."),
            Err(err) => Status::new(
                Tone::Error,
                format!("Failed to initialise WebAssembly module: {}", err),
            ),
        }
    }

    /// Compile, and optionally run, a Rhythm program
    pub async fn compile(&self, request: &CompileRequest) -> Result<CompileReport, PlaygroundError> {
        let module = self.loader.get_module().await?;
        module.set_no_loop(request.no_loop)?;

        if request.source.trim().is_empty() {
            return Ok(CompileReport {
                generated: String::new(),
                user_program: String::new(),
                run: None,
                status: Status::new(Tone::Info, "No Rhythm source code to compile."),
            });
        }

        let generated = module.compile(&request.source)?;
        let user_program = self.extractor(&module).extract_user_program(&generated);

        if !request.run {
            return Ok(CompileReport {
                generated,
                user_program,
                run: None,
                status: Status::new(Tone::Success, "Compilation succeeded."),
            });
        }

        let outcome = self.harness.run(&generated, &request.stdin).await?;
        let status = match outcome.status {
            RunStatus::Succeeded => Status::new(Tone::Success, "Program executed successfully."),
            RunStatus::RuntimeErrors => Status::new(Tone::Error, "Program finished with runtime errors."),
            RunStatus::Exception => Status::new(Tone::Error, "Program terminated with an exception."),
        };

        Ok(CompileReport {
            generated,
            user_program,
            run: Some(outcome),
            status,
        })
    }

    /// The compiler's own user-code-only rendering of `source`
    pub async fn compile_user_code_only(&self, source: &str, no_loop: bool) -> Result<String, PlaygroundError> {
        let module = self.loader.get_module().await?;
        module.set_no_loop(no_loop)?;
        Ok(module.compile_user_code_only(source)?)
    }

    fn extractor(&self, module: &Arc<dyn CompilerModule>) -> &DiffExtractor {
        self.extractor
            .get_or_init(|| DiffExtractor::new(Arc::clone(module)))
    }
}
