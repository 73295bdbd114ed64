//! Compile and run a Rhythm source file.

use anyhow::Result;
use rhythm_runtime::{CompileRequest, Playground};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stdin: Option<PathBuf>,
    pub no_loop: bool,
    pub json: bool,
}

/// Run the playground's "Compile & Run" flow on `file`
pub async fn run_file(config_path: &Path, file: &Path, opts: RunOptions) -> Result<()> {
    let config = super::load_config(config_path)?;
    let source = super::read_source(file)?;
    let stdin = match &opts.stdin {
        Some(path) => super::read_source(path)?,
        None => String::new(),
    };

    let playground = Playground::from_config(&config);
    let request = CompileRequest::new(source)
        .and_run(stdin)
        .no_loop(opts.no_loop || config.compiler.no_loop);

    let report = match playground.compile(&request).await {
        Ok(report) => report,
        Err(err) => {
            let status = err.status();
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&json!({ "status": status }))?);
            }
            eprintln!("{}", status.message);
            super::fail()
        }
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(run) = &report.run {
        print!("{}", run.stdout);
        if !run.stderr.is_empty() {
            eprintln!("{}", run.stderr);
        }
    }
    tracing::info!("{}", report.status);

    if report.status.is_error() {
        super::fail()
    }
    Ok(())
}
