//! # rhythm CLI
//!
//! Command-line front-end for the Rhythm playground host.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rhythm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "rhythm.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the compiler and check that it compiles a sample program
    Smoke {
        /// Directory holding the loader wrapper and binary (defaults to the configured asset dir)
        build_dir: Option<PathBuf>,
    },

    /// Compile a Rhythm program and print the result
    Compile {
        /// Rhythm source file
        file: PathBuf,

        /// Which rendering of the output to print
        #[arg(long, value_enum, default_value_t = View::Generated)]
        view: View,

        /// Reject loop constructs
        #[arg(long)]
        no_loop: bool,
    },

    /// Compile and run a Rhythm program
    Run {
        /// Rhythm source file
        file: PathBuf,

        /// File whose contents are the program's input
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Reject loop constructs
        #[arg(long)]
        no_loop: bool,

        /// Emit the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum View {
    /// The complete generated program
    Generated,
    /// User statements recovered from the generated program
    User,
    /// The compiler's own user-code-only output
    CompilerUser,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    rhythm_runtime::environment::with_environment_mut(|env| {
        let navigator = env.navigator.get_or_insert_with(Default::default);
        navigator.user_agent = format!("rhythm-cli/{}", env!("CARGO_PKG_VERSION"));
    });

    match cli.command {
        Commands::Smoke { build_dir } => commands::smoke_test(&cli.config, build_dir.as_deref()).await,
        Commands::Compile {
            file,
            view,
            no_loop,
        } => commands::compile_file(&cli.config, &file, view, no_loop).await,
        Commands::Run {
            file,
            stdin,
            no_loop,
            json,
        } => {
            let opts = commands::RunOptions {
                stdin,
                no_loop,
                json,
            };
            commands::run_file(&cli.config, &file, opts).await
        }
    }
}
