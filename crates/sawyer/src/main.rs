use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sawyer_core::config::ProjectConfig;
use sawyer_core::pipeline::{fill_logger, qa_logger, GAPFILLED_LEVEL};
use sawyer_core::store::{write_parquet, write_sawyer_file, ProjectStore};
use sawyer_core::table::{parse_timestamp, Cell, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod summary;

const CONFIG_ENV: &str = "SAWYER_CONFIG";
const QA_LEVEL: &str = "qa";

#[derive(Parser, Debug)]
#[command(author, version, about = "QA flagging and gap-filling for datalogger time series", long_about = None)]
struct Cli {
    /// Project configuration directory (falls back to SAWYER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply QA flags to the newest standardised table of a logger
    Qa(QaArgs),
    /// Fill gaps in the newest masked QA table of a logger
    Gapfill(GapfillArgs),
    /// List the rule functions rule files may reference
    Functions,
}

#[derive(Args, Debug)]
struct QaArgs {
    logger: String,
    /// Skip the project-wide flags in <config>/qa_flags.toml
    #[arg(long)]
    no_global: bool,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct GapfillArgs {
    logger: String,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output directory (defaults to the logger's data level directory)
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Sawyer)]
    format: OutputFormat,
    /// Resolve open-ended rule windows against this timestamp instead of the current time
    #[arg(long)]
    end: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Sawyer,
    Parquet,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Sawyer => "txt",
            OutputFormat::Parquet => "parquet",
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Functions => {
            summary::print_functions();
            Ok(())
        }
        Command::Qa(args) => {
            let config = load_config(cli.config)?;
            let store = ProjectStore::new(&config)?;
            run_qa(&store, args)
        }
        Command::Gapfill(args) => {
            let config = load_config(cli.config)?;
            let store = ProjectStore::new(&config)?;
            run_gapfill(&store, args)
        }
    }
}

fn load_config(flag: Option<PathBuf>) -> Result<ProjectConfig> {
    let dir = match flag {
        Some(dir) => dir,
        None => std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .with_context(|| format!("pass --config or set {CONFIG_ENV}"))?,
    };
    ProjectConfig::load(&dir)
        .with_context(|| format!("Failed to load project configuration from '{}'", dir.display()))
}

fn resolve_now(end: Option<&str>) -> Result<NaiveDateTime> {
    match end {
        Some(text) => parse_timestamp(text).with_context(|| format!("invalid --end timestamp '{text}'")),
        None => Ok(chrono::Local::now().naive_local()),
    }
}

fn run_qa(store: &ProjectStore<'_>, args: QaArgs) -> Result<()> {
    let now = resolve_now(args.output.end.as_deref())?;
    let run = qa_logger(store, &args.logger, None, !args.no_global, now)
        .with_context(|| format!("QA failed for logger '{}'", args.logger))?;

    let out_dir = output_dir(store, &args.logger, QA_LEVEL, args.output.out.as_deref())?;
    let source = format!("qa of raw_std data current to {}", run.as_of);
    let format = args.output.format;
    let qa = write_table(store, &run.qa, &out_dir, &args.logger, run.as_of, "qa", &source, format)
        .context("Failed to write QA output")?;
    let masked = write_table(store, &run.masked, &out_dir, &args.logger, run.as_of, "masked", &source, format)
        .context("Failed to write masked output")?;
    let flags = write_table(store, &run.flags, &out_dir, &args.logger, run.as_of, "flags", &source, format)
        .context("Failed to write flag output")?;
    info!(
        qa = %qa.display(),
        masked = %masked.display(),
        flags = %flags.display(),
        "Wrote QA output"
    );

    summary::print_qa_summary(&args.logger, &run);
    Ok(())
}

fn run_gapfill(store: &ProjectStore<'_>, args: GapfillArgs) -> Result<()> {
    let now = resolve_now(args.output.end.as_deref())?;
    let run = fill_logger(store, &args.logger, now)
        .with_context(|| format!("Gap-fill failed for logger '{}'", args.logger))?;

    let out_dir = output_dir(store, &args.logger, GAPFILLED_LEVEL, args.output.out.as_deref())?;
    let source = format!("gap-filled qa data current to {}", run.as_of);
    let filled = write_table(store, &run.filled, &out_dir, &args.logger, run.as_of, "gf", &source, args.output.format)
        .context("Failed to write gap-filled output")?;
    let indicator = write_table(store, &run.indicator, &out_dir, &args.logger, run.as_of, "gfflags", &source, args.output.format)
        .context("Failed to write filled-indicator output")?;
    info!(filled = %filled.display(), indicator = %indicator.display(), "Wrote gap-fill output");

    summary::print_gapfill_summary(&args.logger, &run);
    Ok(())
}

fn output_dir(store: &ProjectStore<'_>, logger: &str, level: &str, out: Option<&Path>) -> Result<PathBuf> {
    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory '{}'", dir.display()))?;
            Ok(dir.to_path_buf())
        }
        None => Ok(store.data_dir(logger, level)?),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_table<T: Cell>(
    store: &ProjectStore<'_>,
    table: &Table<T>,
    dir: &Path,
    logger: &str,
    as_of: NaiveDateTime,
    suffix: &str,
    source: &str,
    format: OutputFormat,
) -> Result<PathBuf> {
    let name = store.file_name(None, logger, Some(as_of), suffix, format.extension())?;
    let path = dir.join(name);
    match format {
        OutputFormat::Sawyer => write_sawyer_file(table, &path, logger, source)?,
        OutputFormat::Parquet => write_parquet(&table.to_frame()?, &path)?,
    }
    Ok(path)
}
