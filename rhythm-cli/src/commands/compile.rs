//! Compile a Rhythm source file.

use crate::View;
use anyhow::Result;
use rhythm_runtime::{CompileRequest, Playground, Tone};
use std::path::Path;

pub async fn compile_file(config_path: &Path, file: &Path, view: View, no_loop: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let source = super::read_source(file)?;
    let no_loop = no_loop || config.compiler.no_loop;
    let playground = Playground::from_config(&config);

    let output = match view {
        View::CompilerUser => playground.compile_user_code_only(&source, no_loop).await,
        View::Generated | View::User => playground
            .compile(&CompileRequest::new(source).no_loop(no_loop))
            .await
            .map(|report| {
                if report.status.tone == Tone::Info {
                    eprintln!("{}", report.status.message);
                }
                if view == View::User {
                    report.user_program
                } else {
                    report.generated
                }
            }),
    };

    match output {
        Ok(text) => {
            if !text.is_empty() {
                println!("{}", text.trim_end_matches('\n'));
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", err.status().message);
            super::fail()
        }
    }
}
