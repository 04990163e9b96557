use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bioimageio_spec::file::OfflineFetcher;
use bioimageio_spec::settings::Settings;
use bioimageio_spec::{
    LoadedDescr, RequestedVersion, Severity, ValidationContext, entry_report, load_description,
    write_package,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "bioimageio",
    about = "Validate and package bioimage.io resource descriptions",
    version
)]
struct Cli {
    /// Logging filter (overrides BIOIMAGEIO_LOG)
    #[arg(long = "log", default_value = "warn", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a resource description (YAML file, directory or zip package)
    Validate(ValidateArgs),
    /// Validate a resource description and bundle it with its files into a zip
    Package(PackageArgs),
}

#[derive(Debug, Args)]
struct LoadArgs {
    /// rdf.yaml / bioimageio.yaml, a directory holding one, or a zip package
    source: PathBuf,

    /// `discover`, `latest` or an explicit `X.Y[.Z]`
    #[arg(long = "format-version", default_value = "discover")]
    format_version: RequestedVersion,

    /// Skip file existence and hash checks
    #[arg(long = "no-io-checks")]
    no_io_checks: bool,

    /// Lowest warning severity that fails validation (info, warning, alert, error)
    #[arg(long = "warning-level")]
    warning_level: Option<Severity>,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[command(flatten)]
    load: LoadArgs,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Abort on the first failed stage instead of collecting diagnostics
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Args)]
struct PackageArgs {
    #[command(flatten)]
    load: LoadArgs,

    /// Path of the zip archive to write
    #[arg(long = "out", value_name = "ZIP")]
    out: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = std::env::var("BIOIMAGEIO_LOG").unwrap_or_else(|_| cli.verbosity.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Validate(args) => validate(args),
        Command::Package(args) => package(args),
    }
}

fn context(args: &LoadArgs, strict: bool) -> ValidationContext {
    let settings = Settings::from_env();
    let mut ctx = ValidationContext::from_settings(&settings).with_raise_errors(strict);
    if args.no_io_checks {
        ctx = ctx.with_perform_io_checks(false);
    }
    if let Some(level) = args.warning_level {
        ctx = ctx.with_warning_level(level);
    }
    ctx
}

fn load(args: &LoadArgs, strict: bool) -> Result<LoadedDescr> {
    let ctx = context(args, strict);
    load_description(&args.source, &ctx, &args.format_version)
        .with_context(|| format!("failed to validate {}", args.source.display()))
}

fn validate(args: ValidateArgs) -> Result<()> {
    let loaded = load(&args.load, args.strict)?;
    let summary = loaded.validation_summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
        if let Some(report) = entry_report(&loaded) {
            println!("{report}");
        }
    }
    if !summary.passed() {
        bail!("{} failed validation", summary.source_name);
    }
    Ok(())
}

fn package(args: PackageArgs) -> Result<()> {
    let loaded = load(&args.load, false)?;
    let descr = match loaded {
        LoadedDescr::Resource(descr) => descr,
        LoadedDescr::Invalid(invalid) => {
            print!("{}", invalid.validation_summary);
            bail!(
                "refusing to package {}: validation failed",
                args.load.source.display()
            );
        }
    };
    let out = write_package(&descr, &args.out, &OfflineFetcher)
        .with_context(|| format!("failed to write package {}", args.out.display()))?;
    println!("{}", out.display());
    Ok(())
}
