//! Execution harness for generated programs
//!
//! Each run gets a fresh QuickJS realm with the ambient stand-ins projected
//! into it and an I/O channel bound to a well-known global. The program text
//! is wrapped into a function, evaluated and called; whatever it leaves in the
//! channel becomes the run's output.

use crate::abi::RuntimeLimits;
use crate::environment;
use parking_lot::Mutex;
use rquickjs::{Array, CatchResultExt, CaughtError, Coerced, Context, Function, Object, Runtime, Value};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Global the generated runtime preamble reads its I/O from
pub const IO_CHANNEL_GLOBAL: &str = "__rhythmIO";

/// Source name attached to the evaluated program
pub const PROGRAM_SOURCE_URL: &str = "rhythm_transpiled.js";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("JavaScript engine error: {0}")]
    Engine(String),

    #[error("A program is already running")]
    RunInFlight,
}

impl From<rquickjs::Error> for HarnessError {
    fn from(err: rquickjs::Error) -> Self {
        HarnessError::Engine(err.to_string())
    }
}

/// Buffers shared with a running program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IoChannel {
    pub stdin: Vec<String>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// Completed but wrote to stderr
    RuntimeErrors,
    /// Terminated by an uncaught exception
    Exception,
}

/// Result of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: f64,
    pub status: RunStatus,
}

/// Split user input into the line array a program reads from.
///
/// Empty input yields no lines; CRLF is treated as LF.
pub fn normalize_input(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.replace("\r\n", "\n").split('\n').map(str::to_string).collect()
}

/// Wrap program text into an evaluable function expression
pub fn wrap_program(generated: &str) -> String {
    format!(
        "(function () {{\n{}\n//# sourceURL={}\n}})",
        generated, PROGRAM_SOURCE_URL
    )
}

struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs generated programs one at a time
#[derive(Debug, Default)]
pub struct ExecutionHarness {
    limits: RuntimeLimits,
    in_flight: AtomicBool,
    last_channel: Mutex<Option<IoChannel>>,
}

impl ExecutionHarness {
    pub fn new(limits: RuntimeLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Run `generated` with `stdin_text` as its input.
    ///
    /// Yields to the scheduler before and after the synchronous run so that
    /// pending work (such as a status update) gets a turn. Overlapping calls
    /// on the same harness are rejected.
    pub async fn run(&self, generated: &str, stdin_text: &str) -> Result<RunOutcome, HarnessError> {
        let _guard = RunGuard::acquire(&self.in_flight).ok_or(HarnessError::RunInFlight)?;
        tokio::task::yield_now().await;
        let outcome = self.execute(generated, normalize_input(stdin_text));
        tokio::task::yield_now().await;
        outcome
    }

    /// Channel contents left behind by the most recent run
    pub fn last_channel(&self) -> Option<IoChannel> {
        self.last_channel.lock().clone()
    }

    fn execute(&self, generated: &str, stdin: Vec<String>) -> Result<RunOutcome, HarnessError> {
        let runtime = Runtime::new()?;
        if let Some(limit) = self.limits.script_memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(timeout_ms) = self.limits.script_timeout_ms {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);
            runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
        }
        let context = Context::full(&runtime)?;
        let env = environment::current();

        let (channel, exception, duration_ms) = context.with(|ctx| -> Result<_, HarnessError> {
            environment::install_js_globals(&ctx, &env)?;

            let io = Object::new(ctx.clone())?;
            io.set("stdin", stdin)?;
            io.set("stdout", Array::new(ctx.clone())?)?;
            io.set("stderr", Array::new(ctx.clone())?)?;
            ctx.globals().set(IO_CHANNEL_GLOBAL, io)?;

            let started = Instant::now();
            let result = ctx
                .eval::<Function, _>(wrap_program(generated))
                .and_then(|program| program.call::<_, Value>(()))
                .map(|_| ())
                .catch(&ctx);
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let exception = result.err().map(describe_caught);
            let channel: Value = ctx.globals().get(IO_CHANNEL_GLOBAL)?;
            let channel = IoChannel {
                stdin: read_lines(&channel, "stdin"),
                stdout: read_lines(&channel, "stdout"),
                stderr: read_lines(&channel, "stderr"),
            };
            Ok((channel, exception, duration_ms))
        })?;

        let stdout = channel.stdout.concat();
        let mut stderr = channel.stderr.join("\n");
        let status = match exception {
            Some(message) => {
                if stderr.is_empty() {
                    stderr = message;
                }
                RunStatus::Exception
            }
            None if !stderr.is_empty() => RunStatus::RuntimeErrors,
            None => RunStatus::Succeeded,
        };
        debug!(?status, duration_ms, "program finished");

        *self.last_channel.lock() = Some(channel);
        Ok(RunOutcome {
            stdout,
            stderr,
            duration_ms,
            status,
        })
    }
}

/// Read one channel buffer; anything that is not an array reads as empty.
///
/// Entries are rendered the way `Array.prototype.join` renders them, so
/// `null` and `undefined` become empty strings.
fn read_lines(channel: &Value<'_>, field: &str) -> Vec<String> {
    let Some(object) = channel.as_object() else {
        return Vec::new();
    };
    let Ok(value) = object.get::<_, Value>(field) else {
        return Vec::new();
    };
    let Some(array) = value.as_array() else {
        return Vec::new();
    };
    array
        .iter::<Value>()
        .filter_map(Result::ok)
        .map(|entry| {
            if entry.is_null() || entry.is_undefined() {
                String::new()
            } else {
                coerce_string(&entry)
            }
        })
        .collect()
}

fn coerce_string(value: &Value<'_>) -> String {
    value
        .get::<Coerced<String>>()
        .map(|text| text.0)
        .unwrap_or_default()
}

/// `error.message || String(error)` for an uncaught exception
fn describe_caught(caught: CaughtError<'_>) -> String {
    match caught {
        CaughtError::Exception(exception) => describe_thrown(exception.as_object().as_value()),
        CaughtError::Value(value) => describe_thrown(&value),
        CaughtError::Error(err) => err.to_string(),
    }
}

fn describe_thrown(thrown: &Value<'_>) -> String {
    let message = thrown
        .as_object()
        .and_then(|object| object.get::<_, Value>("message").ok())
        .filter(|message| !message.is_null() && !message.is_undefined())
        .map(|message| coerce_string(&message))
        .unwrap_or_default();
    if message.is_empty() {
        coerce_string(thrown)
    } else {
        message
    }
}
