//! Command-line host for JustPlug plugins.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use justplug_core::library::LibraryHandle;
use justplug_core::metadata::read_metadata;
use justplug_core::{discover, ManagerConfig, NativeLoader, PluginManager, PLUGIN_API_VERSION};

/// JustPlug - load and inspect native plugins.
#[derive(Parser, Debug)]
#[command(name = "justplug")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load every plugin, report the outcome, then unload them.
    Load {
        /// Plugin directory to scan (repeatable). Overrides the config file.
        #[arg(short, long)]
        dir: Vec<PathBuf>,
        /// Configuration file (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Descend into sub-directories.
        #[arg(short, long)]
        recursive: bool,
        /// Stop at the first failing plugin.
        #[arg(long)]
        fail_fast: bool,
    },
    /// List the plugin files a load would consider.
    Scan {
        /// Plugin directory to scan.
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Descend into sub-directories.
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show the metadata of a plugin file without running it.
    Inspect {
        /// Path to the plugin file.
        #[arg(required = true)]
        path: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Load {
            dir,
            config,
            recursive,
            fail_fast,
        } => run_load(dir, config, recursive, fail_fast),
        Command::Scan { dir, recursive } => run_scan(dir, recursive),
        Command::Inspect { path, json } => run_inspect(path, json),
    }
}

fn init_logging(verbose: bool) {
    // JSON output for container and log-shipping environments
    let json_logging = std::env::var("JUSTPLUG_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "justplug=debug" } else { "justplug=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

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

/// Configuration from the file (or defaults and environment), with command
/// line flags on top.
fn resolve_config(
    dirs: Vec<PathBuf>,
    config: Option<PathBuf>,
    recursive: bool,
    fail_fast: bool,
) -> Result<ManagerConfig> {
    let mut resolved = match config {
        Some(path) => ManagerConfig::load(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?
            .with_env_overrides(),
        None => ManagerConfig::from_env(),
    };
    if !dirs.is_empty() {
        resolved.plugin_dirs = dirs;
    }
    if recursive {
        resolved.recursive = true;
    }
    if fail_fast {
        resolved.continue_on_error = false;
    }
    Ok(resolved)
}

fn run_load(
    dirs: Vec<PathBuf>,
    config: Option<PathBuf>,
    recursive: bool,
    fail_fast: bool,
) -> Result<()> {
    let config = resolve_config(dirs, config, recursive, fail_fast)?;
    for dir in &config.plugin_dirs {
        tracing::debug!("Plugin directory: {}", dir.display());
    }

    let manager = PluginManager::new(config);
    let report = manager.load_configured();
    print!("{}", report);

    if manager.count() > 0 {
        println!();
        println!("Loaded plugins:");
        for name in manager.plugin_names() {
            if let Some(info) = manager.plugin_info(&name) {
                println!("  {}", info);
            }
        }
    }

    let unloaded = manager.unload_all();
    if !unloaded.entries.is_empty() {
        println!();
        println!("Unloaded: {}", unloaded.order().join(", "));
    }
    for (name, error) in unloaded.errors() {
        eprintln!("Error unloading {}: {}", name, error);
    }

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{} plugin(s) failed to load", failed);
    }
    Ok(())
}

fn run_scan(dir: Option<PathBuf>, recursive: bool) -> Result<()> {
    let dirs = match dir {
        Some(dir) => vec![dir],
        None => ManagerConfig::from_env().plugin_dirs,
    };

    for dir in dirs {
        let found = discover(&dir, recursive);
        println!("{}:", dir.display());
        if found.paths.is_empty() {
            println!("  (no plugins)");
        }
        for path in &found.paths {
            println!("  {}", path.display());
        }
        for error in &found.errors {
            eprintln!("  warning: {}", error);
        }
    }
    Ok(())
}

fn run_inspect(path: PathBuf, json: bool) -> Result<()> {
    let handle = LibraryHandle::open(&NativeLoader::new(), &path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let metadata = read_metadata(&handle)
        .with_context(|| format!("Failed to read metadata from {}", path.display()))?;
    handle.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Name:        {}", metadata.name);
    if !metadata.pretty_name.is_empty() {
        println!("Pretty name: {}", metadata.pretty_name);
    }
    println!("Version:     {}", metadata.version);
    println!(
        "API:         {}{}",
        metadata.api_version,
        if metadata.api_version == PLUGIN_API_VERSION {
            ""
        } else {
            " (incompatible with this host)"
        }
    );
    for (label, value) in [
        ("Author:     ", &metadata.author),
        ("Description:", &metadata.description),
        ("URL:        ", &metadata.url),
        ("License:    ", &metadata.license),
        ("Copyright:  ", &metadata.copyright),
    ] {
        if !value.is_empty() {
            println!("{} {}", label, value);
        }
    }
    if !metadata.dependencies.is_empty() {
        println!("Dependencies:");
        for dep in &metadata.dependencies {
            println!("  {} {}", dep.name, dep.version);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = resolve_config(vec![PathBuf::from("/srv/plugins")], None, true, true).unwrap();
        assert_eq!(config.plugin_dirs, vec![PathBuf::from("/srv/plugins")]);
        assert!(config.recursive);
        assert!(!config.continue_on_error);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["justplug", "load", "-d", "a", "-d", "b", "--fail-fast"]);
        match args.command {
            Command::Load { dir, fail_fast, .. } => {
                assert_eq!(dir.len(), 2);
                assert!(fail_fast);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
