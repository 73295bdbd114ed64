//! Smoke check of a built compiler artifact pair.

use anyhow::{bail, Context, Result};
use rhythm_runtime::ModuleLoader;
use std::path::Path;

const SAMPLE_SOURCE: &str = "print(\"Hello, Rhythm!\n\");\n";

/// Load the compiler from `build_dir` and exercise every entry point once
pub async fn smoke_test(config_path: &Path, build_dir: Option<&Path>) -> Result<()> {
    match check(config_path, build_dir).await {
        Ok(length) => {
            println!("transpose_wasm smoke test succeeded.");
            println!("Generated JavaScript length: {}", length);
            Ok(())
        }
        Err(err) => {
            eprintln!("transpose_wasm smoke test failed: {:#}", err);
            super::fail()
        }
    }
}

async fn check(config_path: &Path, build_dir: Option<&Path>) -> Result<usize> {
    let config = super::load_config(config_path)?;
    let mut settings = config.loader_settings();
    if let Some(dir) = build_dir {
        settings.asset_dir = dir.to_path_buf();
    }
    settings.asset_dir = std::fs::canonicalize(&settings.asset_dir)
        .with_context(|| format!("Build directory {} is not accessible", settings.asset_dir.display()))?;

    let loader = ModuleLoader::new(settings);
    let module = loader.get_module().await?;

    let js = module.compile(SAMPLE_SOURCE).context("compile() failed")?;
    if js.is_empty() {
        bail!("compile() returned an unexpected result");
    }
    module
        .compile_user_code_only(SAMPLE_SOURCE)
        .context("compileUserCodeOnly() failed")?;
    module.set_no_loop(false).context("setNoLoop() failed")?;

    // Length as a JavaScript string reports it
    Ok(js.encode_utf16().count())
}
