//! pipegen CLI Entry Point
//!
//! Builds, and optionally submits, the job DAG described by a configuration
//! file.
//!
//! # Usage
//!
//! ```bash
//! # Write the HTCondor DAG for a run
//! pipegen run.yaml
//!
//! # Override configuration values and submit
//! pipegen run.yaml --sampler dynesty nestle --coherence-test --submit
//!
//! # Render a Slurm master script instead
//! pipegen run.yaml --scheduler slurm --scheduler-args "partition=short"
//!
//! # Unknown options are forwarded to every job
//! pipegen run.yaml --sampling-seed 42
//! ```

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use log::info;

use pipegen::backend::create_backend;
use pipegen::config::{load_config, parse_arguments, RunConfig};
use pipegen::input::executable::{print_executable_help, resolve_executable, DEFAULT_LIBRARY};
use pipegen::input::{CommandInjectionGenerator, Input, InjectionGenerator};
use pipegen::pipeline;
use pipegen::{APP_NAME, VERSION};

/// Configures the logging system with appropriate formatting.
fn setup_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Cluster Job Graph Generator");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: pipegen <CONFIG_FILE> [OPTIONS] [JOB ARGUMENTS]");
    println!();
    println!("The configuration file should come first. List options such as");
    println!("--detectors take every following value up to the next option or");
    println!("the first existing file.");
    println!();
    println!("Arguments:");
    println!("  <CONFIG_FILE>           Path to the YAML run configuration");
    println!("  [JOB ARGUMENTS]         Unrecognized options, forwarded to every job");
    println!();
    println!("Options:");
    println!("  --label NAME            Run label used in job and file names");
    println!("  --outdir PATH           Output directory");
    println!("  --detectors D...        Detectors to analyse (e.g. H1 L1)");
    println!("  --sampler S...          Samplers to run");
    println!("  --coherence-test        Also analyse every detector on its own");
    println!("  --queue N               Instances queued per analysis job");
    println!("  --accounting TAG        Accounting group");
    println!("  --x509 PATH             Credential file");
    println!("  --injection             Analyse simulated signals");
    println!("  --injection-file PATH   Injection file to use");
    println!("  --scheduler NAME        condor (default) or slurm");
    println!("  --submit                Submit after writing the files");
    println!("  --exe-help              Show the analysis executable's help");
    println!("  --verbose               Enable debug logging");
    println!("  --help                  Show this help message");
    println!("  --version               Show version information");
    println!();
    println!("Every configuration key can be overridden as --<key>.");
}

/// Creates the injection generator named by the configuration, if any.
fn build_injector(config: &RunConfig) -> pipegen::Result<Option<CommandInjectionGenerator>> {
    let Some(name) = config.injection_executable.as_deref() else {
        return Ok(None);
    };

    let library = config
        .exe_library
        .clone()
        .unwrap_or_else(|| DEFAULT_LIBRARY.clone());
    let executable = resolve_executable(name, &library)?;
    info!("Injection generator: {}", executable.display());
    Ok(Some(CommandInjectionGenerator::new(executable)))
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let cli = parse_arguments(&args).map_err(|e| {
        print_usage();
        e
    })?;

    if cli.help {
        print_usage();
        return Ok(());
    }
    if cli.version {
        println!("{} {}", APP_NAME, VERSION);
        return Ok(());
    }

    let Some(config_path) = cli.config_path else {
        print_usage();
        return Err("no configuration file given".into());
    };

    // `--verbose` is merged into the configuration, so the file can set it too.
    let config = load_config(&config_path, cli.overrides)?;
    setup_logging(config.log_filter());
    print_banner();
    info!("Configuration: {}", config_path.display());

    let input = Input::from_config(&config, cli.passthrough)?;
    info!(
        "Run '{}': detectors {:?}, samplers {:?}",
        input.label(),
        input.instruments(),
        input.samplers()
    );

    if cli.exe_help {
        print_executable_help(input.executable())?;
        return Ok(());
    }

    let injector = build_injector(&config)?;
    let backend = create_backend(&config);
    info!("Scheduler backend: {}", backend.name());

    let summary = pipeline::run(
        input,
        backend.as_ref(),
        injector.as_ref().map(|g| g as &dyn InjectionGenerator),
        config.submit,
    )?;

    println!();
    println!(
        "{} {} jobs written, entry point {}",
        "Done:".green().bold(),
        summary.jobs,
        summary.entry_point.display()
    );
    if summary.submitted {
        println!("Submitted with the {} backend", summary.backend);
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
