//! User-program extraction
//!
//! Generated programs carry a runtime preamble and the core library ahead of
//! the user's statements, all inside one `try { ... } catch (err) {` block.
//! Compiling a blank program yields the same block with only the library in
//! it; stripping that baseline from a real program's block leaves the user's
//! code.

use crate::abi::CompilerModule;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::warn;

const BLOCK_OPEN: &str = "try {";
const BLOCK_CLOSE: &str = "} catch (err) {";

/// Source compiled to obtain the baseline
const BLANK_PROGRAM: &str = " ";

/// Content of the outermost try block, or `None` when the markers are absent.
///
/// The open marker is the first line starting with `try {`, the close marker
/// the next line starting with `} catch (err) {`. One newline after the open
/// marker is dropped.
pub fn program_block(text: &str) -> Option<&str> {
    let open = line_starting_with(text, 0, BLOCK_OPEN)?;
    let mut content_start = open + BLOCK_OPEN.len();
    if text[content_start..].starts_with("\r\n") {
        content_start += 2;
    } else if text[content_start..].starts_with('\n') {
        content_start += 1;
    }
    let close = line_starting_with(text, content_start, BLOCK_CLOSE)?;
    Some(&text[content_start..close])
}

/// Byte offset of the first line at or after `from` that starts with `marker`
fn line_starting_with(text: &str, from: usize, marker: &str) -> Option<usize> {
    let mut offset = from;
    if offset > 0 && !text[..offset].ends_with('\n') {
        offset = offset + text[offset..].find('\n')? + 1;
    }
    loop {
        let rest = &text[offset..];
        if rest.starts_with(marker) {
            return Some(offset);
        }
        offset += rest.find('\n')? + 1;
    }
}

/// Remove leading blank lines, dedent by the smallest indent, trim.
pub fn normalize_snippet(snippet: &str) -> String {
    let lines: Vec<&str> = snippet
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .collect();

    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min();
    let Some(indent) = indent else {
        return String::new();
    };

    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.get(indent..).unwrap_or_else(|| line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Extract the user's code given an already computed baseline block.
///
/// The generated text is returned unchanged when there is no baseline or
/// when it has no try block.
pub fn extract_with_baseline(generated: &str, baseline: &str) -> String {
    if baseline.is_empty() {
        return generated.to_string();
    }
    let Some(block) = program_block(generated) else {
        return generated.to_string();
    };

    let user = if let Some(rest) = block.strip_prefix(baseline) {
        rest
    } else if let Some(rest) = block.strip_prefix(baseline.trim_end()) {
        rest
    } else {
        block
    };
    normalize_snippet(user)
}

/// Extracts user code from generated programs of one compiler module.
///
/// The baseline is computed once, on first use.
pub struct DiffExtractor {
    module: Arc<dyn CompilerModule>,
    baseline: OnceCell<String>,
}

impl DiffExtractor {
    pub fn new(module: Arc<dyn CompilerModule>) -> Self {
        Self {
            module,
            baseline: OnceCell::new(),
        }
    }

    /// The try-block of a blank program; empty when it cannot be computed
    pub fn baseline(&self) -> &str {
        self.baseline.get_or_init(|| match self.module.compile(BLANK_PROGRAM) {
            Ok(generated) => match program_block(&generated) {
                Some(block) => block.to_string(),
                None => {
                    warn!("baseline program has no try block; user code extraction disabled");
                    String::new()
                }
            },
            Err(err) => {
                warn!(error = %err, "failed to compile baseline program; user code extraction disabled");
                String::new()
            }
        })
    }

    /// The user's statements in `generated`, dedented and trimmed
    pub fn extract_user_program(&self, generated: &str) -> String {
        extract_with_baseline(generated, self.baseline())
    }
}
