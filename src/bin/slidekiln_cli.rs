//! Slidekiln CLI - build presentations from a schema file
//!
//! Commands: validate, build
//! Exit codes: 0 success, 2 validation failure, 1 run could not start/finish.
//! Per-asset generation failures are reported but keep exit code 0; re-run
//! the same command to retry just the missing assets.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use slidekiln_core::{
    build::{BuildOptions, BuildOrchestrator},
    schema::PresentationSchema,
    validation::{validate_source, ValidationReport},
    AssetSpec, BuildError, OpenAiImageClient,
};

#[derive(Parser)]
#[command(name = "slidekiln-cli")]
#[command(about = "Slidekiln - Versioned Presentation Asset Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a presentation schema file
    Validate {
        /// Path to the schema JSON file
        schema: PathBuf,
    },

    /// Build a presentation: validate, version, generate assets
    Build {
        /// Path to the schema JSON file
        schema: PathBuf,

        /// Output directory override (disables versioning)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write into a plain build directory without version tracking
        #[arg(long)]
        no_version: bool,

        /// Root directory for versioned builds
        #[arg(long, default_value = "build")]
        build_root: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { schema } => run_validate(&schema),
        Commands::Build {
            schema,
            output,
            no_version,
            build_root,
        } => run_build(&schema, output, no_version, build_root),
    }
}

fn print_validation(path: &std::path::Path, report: &ValidationReport) {
    println!("Validating: {}", path.display());
    println!("{}", "=".repeat(50));

    if !report.errors.is_empty() {
        println!("\n{} ERROR(S) FOUND:", report.errors.len());
        for error in &report.errors {
            println!("  ERROR: {error}");
        }
    }
    if !report.warnings.is_empty() {
        println!("\n{} WARNING(S):", report.warnings.len());
        for warning in &report.warnings {
            println!("  WARNING: {warning}");
        }
    }

    if report.is_valid() && report.warnings.is_empty() {
        println!("VALIDATION PASSED - no errors or warnings");
    } else if report.is_valid() {
        println!(
            "\nVALIDATION PASSED - {} warning(s), non-critical",
            report.warnings.len()
        );
    } else {
        println!(
            "\nVALIDATION FAILED - {} error(s) must be fixed",
            report.errors.len()
        );
    }
}

fn run_validate(schema_path: &std::path::Path) -> ExitCode {
    let raw = match fs::read_to_string(schema_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read schema file {}: {e}", schema_path.display());
            return ExitCode::FAILURE;
        }
    };

    let report = validate_source(&raw);
    print_validation(schema_path, &report);
    if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2) // Validation failure
    }
}

fn run_build(
    schema_path: &std::path::Path,
    output: Option<PathBuf>,
    no_version: bool,
    build_root: PathBuf,
) -> ExitCode {
    let raw = match fs::read_to_string(schema_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read schema file {}: {e}", schema_path.display());
            return ExitCode::FAILURE;
        }
    };

    // Gate early so the user sees the full fault report before any
    // generator credentials or network access are needed.
    let report = validate_source(&raw);
    if !report.is_valid() {
        print_validation(schema_path, &report);
        return ExitCode::from(2);
    }

    let schema = match PresentationSchema::from_str(&raw) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("schema does not match the document model: {e}");
            return ExitCode::FAILURE;
        }
    };

    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => {
            eprintln!("OPENAI_API_KEY is not set; cannot reach the image generator");
            return ExitCode::FAILURE;
        }
    };
    let generator = match OpenAiImageClient::new(api_key, schema.asset_config.dalle_model) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("cannot initialize generator client: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Building: {} ({})", schema.meta.title, schema.meta.short_name);

    let total_specs = AssetSpec::derive(&schema).len() as u64;
    let bar = ProgressBar::new(total_specs);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let options = BuildOptions {
        build_root,
        output_override: output,
        versioned: !no_version,
        ..BuildOptions::default()
    };
    let orchestrator = BuildOrchestrator::new(&generator, options);

    let result = orchestrator.run(schema_path, |progress| {
        bar.set_message(progress.filename.clone());
        bar.inc(1);
    });
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            if let Some(version) = report.version {
                println!("Version: v{version}");
                if let Some(previous) = report.previous_version {
                    println!("Previous version: v{previous}");
                }
            }
            if report.carried_forward > 0 {
                println!(
                    "Carried forward {} asset(s) from the previous version",
                    report.carried_forward
                );
            }
            println!(
                "Assets: {} ok ({} generated, {} already present), {} failed",
                report.materialize.succeeded.len(),
                report.materialize.written,
                report.materialize.skipped,
                report.materialize.failed.len()
            );
            println!("Runtime slides: {}", report.slide_count);
            println!("Build directory: {}", report.build_dir.display());

            for warning in &report.validation_warnings {
                println!("  WARNING: {warning}");
            }
            if let Some(warning) = &report.pointer_warning {
                println!("  WARNING: {warning}");
            }

            if !report.materialize.failed.is_empty() {
                println!("\nFailed assets (re-run the same command to retry):");
                for failure in &report.materialize.failed {
                    println!("  - {failure}");
                }
            }
            // Best-effort batch semantics: asset failures alone do not
            // change the exit code.
            ExitCode::SUCCESS
        }
        Err(BuildError::Rejected { report }) => {
            print_validation(schema_path, &report);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("build failed: {e}");
            ExitCode::FAILURE
        }
    }
}
