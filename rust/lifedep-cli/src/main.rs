//! Lifedep CLI: ownership and lifetime-dependency checking for IR modules.

use clap::{Parser as ClapParser, Subcommand};
use lifedep_cli::colors::{red, status_label};
use lifedep_cli::commands::{self, CheckArgs, OutputFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(ClapParser)]
#[command(name = "lifedep", version, about = "Lifetime-dependency checker for nonescapable values")]
struct Cli {
    /// Log checker progress to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a module (IR as JSON)
    Check {
        /// Path to the module JSON file
        #[arg()]
        file: PathBuf,

        /// Config file (default: nearest lifedep.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Warn when immortal values are built from transient globals
        #[arg(long)]
        strict_immortal: bool,

        /// Worker threads for parallel checking
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Check declarations one at a time
        #[arg(long)]
        sequential: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Ansi)]
        format: OutputFormat,
    },
    /// List every diagnostic code
    Codes,
    /// Show the documentation of one diagnostic code
    Explain {
        /// Code such as E0202
        code: String,
    },
    /// Create a lifedep.toml config file in the current directory
    Init,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "lifedep_checker=debug,lifedep_cli=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn fail(message: &str) -> ExitCode {
    eprintln!("{} {}", red("error:"), message);
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check {
            file,
            config,
            strict_immortal,
            jobs,
            sequential,
            format,
        } => {
            let args = CheckArgs {
                file,
                config,
                strict_immortal,
                jobs,
                sequential,
                format,
            };
            match commands::run_check(&args, &mut std::io::stdout().lock()) {
                Ok(true) => ExitCode::FAILURE,
                Ok(false) => ExitCode::SUCCESS,
                Err(e) => fail(&e),
            }
        }
        Commands::Codes => {
            print!("{}", commands::codes_listing());
            ExitCode::SUCCESS
        }
        Commands::Explain { code } => match commands::explain(&code) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e),
        },
        Commands::Init => {
            let dir = match std::env::current_dir() {
                Ok(dir) => dir,
                Err(e) => return fail(&format!("cannot determine current directory: {}", e)),
            };
            match commands::run_init(&dir) {
                Ok(path) => {
                    println!("{} {}", status_label("Created"), path.display());
                    ExitCode::SUCCESS
                }
                Err(e) => fail(&e),
            }
        }
    }
}
