//! Subcommand implementations.

use crate::colors::{bold, gray, green, red, status_label, yellow};
use crate::config::{LifedepConfig, CONFIG_FILE};

use lifedep_checker::checker::error_codes::{all_error_codes, error_doc};
use lifedep_checker::{check_module, load_module, CheckOptions, ImmortalMode, ModuleReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Plain,
    Ansi,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct CheckArgs {
    pub file: PathBuf,
    pub config: Option<PathBuf>,
    pub strict_immortal: bool,
    pub jobs: Option<usize>,
    pub sequential: bool,
    pub format: OutputFormat,
}

/// Options from the config file, overridden by command-line flags.
pub fn resolve_options(args: &CheckArgs) -> Result<CheckOptions, String> {
    let mut options = match &args.config {
        Some(path) => LifedepConfig::load_from(path)?.check,
        None => LifedepConfig::load()?.check,
    };
    if args.strict_immortal {
        options.immortal_mode = ImmortalMode::Strict;
    }
    if args.jobs.is_some() {
        options.jobs = args.jobs;
    }
    if args.sequential {
        options.parallel = false;
    }
    debug!(?options, "resolved check options");
    Ok(options)
}

/// Check one module file and write the report. Returns whether any
/// error-severity diagnostic was produced.
pub fn run_check(args: &CheckArgs, out: &mut dyn Write) -> Result<bool, String> {
    let options = resolve_options(args)?;
    let module = load_module(&args.file).map_err(|e| e.to_string())?;
    let mut report = check_module(&module, &options).map_err(|e| e.to_string())?;
    let filename = args.file.display().to_string();
    report.diagnostics = std::mem::take(&mut report.diagnostics).with_file(&filename);

    let text = match args.format {
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            json.push('\n');
            json
        }
        OutputFormat::Plain => format!("{}{}\n", report.diagnostics.render_plain(), summary(&report)),
        OutputFormat::Ansi => render_ansi(&report, &filename),
    };
    out.write_all(text.as_bytes())
        .map_err(|e| format!("cannot write report: {}", e))?;
    Ok(report.has_errors())
}

fn summary(report: &ModuleReport) -> String {
    format!(
        "checked {} declaration(s): {} error(s), {} warning(s)",
        report.functions.len(),
        report.diagnostics.errors().count(),
        report.diagnostics.warnings().count()
    )
}

fn render_ansi(report: &ModuleReport, filename: &str) -> String {
    let mut out = format!("{} {}\n", status_label("Checking"), filename);
    out.push_str(&report.diagnostics.render_ansi());
    let errors = report.diagnostics.errors().count();
    let warnings = report.diagnostics.warnings().count();
    let line = if errors > 0 {
        format!("{} {}", red("✗"), bold(&summary(report)))
    } else if warnings > 0 {
        format!("{} {}", yellow("!"), bold(&summary(report)))
    } else {
        format!("{} {} {}", green("✓"), bold(filename), gray("no errors found"))
    };
    out.push_str(&line);
    out.push('\n');
    out
}

/// Every stable diagnostic code with its documentation.
pub fn codes_listing() -> String {
    all_error_codes()
        .into_iter()
        .map(|(code, doc)| format!("{}  {}\n", code, doc))
        .collect()
}

pub fn explain(code: &str) -> Result<String, String> {
    let code = code.to_ascii_uppercase();
    error_doc(&code)
        .map(|doc| format!("{}: {}\n", code, doc))
        .ok_or_else(|| format!("unknown diagnostic code '{}'", code))
}

/// Write the default `lifedep.toml` into `dir`. Never overwrites.
pub fn run_init(dir: &Path) -> Result<PathBuf, String> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() {
        return Err(format!("{} already exists, not overwriting", path.display()));
    }
    std::fs::write(&path, LifedepConfig::default_template())
        .map_err(|e| format!("writing {}: {}", path.display(), e))?;
    Ok(path)
}
