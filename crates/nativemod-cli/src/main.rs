//! Command-line interface for the nativemod loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use nativemod_core::abi::{self, free_load_results, AbiState};
use nativemod_core::config::env_vars;
use nativemod_core::ffi::LoadResultTag;
use nativemod_core::loader::{default_pattern, describe};
use nativemod_core::sort::{sort_by_dependencies, validate_dependencies};
use nativemod_core::{lifecycle, LoaderConfig, ModLoader, Startup};
use serde::Serialize;

/// Native modloader - inspect, order and load native mods.
#[derive(Parser, Debug)]
#[command(name = "nativemod")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Directory selection shared by the directory commands.
#[derive(ClapArgs, Debug)]
struct DirArgs {
    /// Directory to scan.
    dir: PathBuf,
    /// Filename glob (defaults to the platform library extension).
    #[arg(short, long)]
    pattern: Option<String>,
    /// Descend into subdirectories.
    #[arg(short, long)]
    recursive: bool,
}

impl DirArgs {
    fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or(default_pattern())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List binaries in a directory with their declared dependencies.
    Scan {
        #[command(flatten)]
        dir: DirArgs,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the dependency load order of a directory.
    Order {
        #[command(flatten)]
        dir: DirArgs,
    },
    /// Load every binary in a directory, print outcomes, then unload.
    Load {
        #[command(flatten)]
        dir: DirArgs,
        /// Run setup, load and late_load on each binary.
        #[arg(long)]
        lifecycle: bool,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Run the full libs / early_mods / mods startup.
    Boot {
        /// TOML configuration file. Environment variables are used otherwise.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the root load path.
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ScanEntry<'a> {
    name: &'a str,
    path: &'a Path,
    dependencies: &'a [String],
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Scan { dir, json } => run_scan(&dir, json),
        Command::Order { dir } => run_order(&dir),
        Command::Load {
            dir,
            lifecycle,
            json,
        } => run_load(&dir, lifecycle, json),
        Command::Boot { config, root } => run_boot(config, root),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "nativemod=debug" } else { "nativemod=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so command output stays parseable.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run_scan(args: &DirArgs, json: bool) -> Result<()> {
    let descriptors = describe(&args.dir, args.pattern(), args.recursive)
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;

    if json {
        let entries: Vec<ScanEntry> = descriptors
            .iter()
            .map(|d| ScanEntry {
                name: d.name(),
                path: d.path(),
                dependencies: d.dependencies(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!("No binaries found in {}", args.dir.display());
        return Ok(());
    }
    for descriptor in &descriptors {
        println!("{}", descriptor.name());
        for dep in descriptor.dependencies() {
            println!("  needs {}", dep);
        }
    }
    Ok(())
}

fn run_order(args: &DirArgs) -> Result<()> {
    let descriptors = describe(&args.dir, args.pattern(), args.recursive)
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;
    for descriptor in sort_by_dependencies(descriptors) {
        println!("{}", descriptor.name());
    }
    Ok(())
}

fn run_load(args: &DirArgs, run_lifecycle: bool, json: bool) -> Result<()> {
    let mut loader = ModLoader::new();
    let outcomes = loader
        .load_directory(&args.dir, args.pattern(), args.recursive)
        .with_context(|| format!("Failed to load {}", args.dir.display()))?;

    if run_lifecycle {
        let report = lifecycle::run_all(outcomes);
        tracing::info!(
            setup = report.setup.called,
            load = report.load.called,
            late_load = report.late_load.called,
            faults = report.setup.faulted + report.load.faulted + report.late_load.faulted,
            "Lifecycle finished"
        );
    }

    let diagnostics = validate_dependencies(loader.outcomes());
    if json {
        let summaries: Vec<_> = loader.outcomes().iter().map(|o| o.summary()).collect();
        let doc = serde_json::json!({
            "records": summaries,
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        for outcome in loader.outcomes() {
            match outcome.failure() {
                None => println!(
                    "loaded  {} ({} {})",
                    outcome.descriptor().name(),
                    outcome.identifier(),
                    outcome.version()
                ),
                Some(reason) => println!("failed  {}: {}", outcome.descriptor().name(), reason),
            }
        }
        for diagnostic in &diagnostics {
            println!("warning {}", diagnostic);
        }
    }

    loader.unload_all();
    Ok(())
}

fn run_boot(config_path: Option<PathBuf>, root: Option<PathBuf>) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => LoaderConfig::from_toml_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => LoaderConfig::from_env(),
    };
    if let Some(root) = root {
        config.root_load_path = root;
    }

    let state = Arc::new(AbiState::new());
    abi::install(Arc::clone(&state));

    let report = Startup::new(config).run(&state)?;
    for diagnostic in report.diagnostics() {
        println!("warning {}", diagnostic);
    }

    let mut snapshot = state.all_results();
    // SAFETY: `snapshot` came from `all_results` and is released once below.
    for entry in unsafe { snapshot.as_slice() } {
        let tag = match entry.tag {
            LoadResultTag::Loaded => "loaded",
            LoadResultTag::Failed => "failed",
            LoadResultTag::NotFound => "missing",
        };
        println!("{:<7} {}", tag, entry.payload_str());
    }
    unsafe { free_load_results(&mut snapshot) };

    println!(
        "{} libs, {} early mods, {} mods",
        report.libs.loaded, report.early_mods.loaded, report.mods.loaded
    );
    state.unload_all();
    Ok(())
}
