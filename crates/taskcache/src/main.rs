//! taskcache: scheduled task history from SOFTWARE hives.
//!
//! Records go to stdout; logs go to stderr so the output stays machine
//! readable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use taskcache::plugins::{find_plugin, PluginDescriptor, PLUGINS};
use taskcache::scan::{scan_all, InputKind};
use taskcache::{EventEnvelope, OutputFormat, ScanConfig};
use tracing_subscriber::EnvFilter;
use winreg::HiveType;

#[derive(Parser, Debug)]
#[command(name = "taskcache")]
#[command(version, about = "Extract Task Scheduler cache records from registry hives")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan hive files and print the records found
    Scan {
        /// Hive files to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Inputs are JSON hive snapshots instead of regf files
        #[arg(long)]
        snapshot: bool,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scan this key instead of the registered Task Cache path
        #[arg(long)]
        key_path: Option<String>,

        /// Treat every input as this hive type (e.g. SOFTWARE)
        #[arg(long)]
        registry_type: Option<HiveType>,

        /// Depth limit for the Tree walk
        #[arg(long)]
        max_tree_depth: Option<usize>,

        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// List the available plugins
    Plugins {
        /// Show only this plugin
        name: Option<String>,
    },
}

/// A record together with the input it came from.
#[derive(Serialize)]
struct OutputRecord<'a> {
    source: String,
    #[serde(flatten)]
    event: &'a EventEnvelope,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scan {
            paths,
            snapshot,
            config,
            key_path,
            registry_type,
            max_tree_depth,
            format,
        } => {
            let mut scan_config = match config {
                Some(path) => ScanConfig::load(&path)?,
                None => ScanConfig::default(),
            };
            if key_path.is_some() {
                scan_config.key_path = key_path;
            }
            if registry_type.is_some() {
                scan_config.registry_type = registry_type;
            }
            if let Some(depth) = max_tree_depth {
                scan_config.max_tree_depth = depth;
            }
            if let Some(format) = format {
                scan_config.output = format;
            }
            let kind = if snapshot {
                InputKind::Snapshot
            } else {
                InputKind::Regf
            };
            run_scan(&paths, kind, &scan_config)
        }
        Commands::Plugins { name } => {
            let selected: Vec<&PluginDescriptor> = match name {
                Some(name) => match find_plugin(&name) {
                    Some(plugin) => vec![plugin],
                    None => anyhow::bail!("unknown plugin: {}", name),
                },
                None => PLUGINS.iter().collect(),
            };
            for plugin in selected {
                println!("{} ({})", plugin.name, plugin.registry_type);
                println!("  {}", plugin.description);
                for key_path in plugin.key_paths {
                    println!("  key: {}", key_path);
                }
                for url in plugin.urls {
                    println!("  see: {}", url);
                }
            }
            Ok(())
        }
    }
}

fn run_scan(paths: &[PathBuf], kind: InputKind, config: &ScanConfig) -> anyhow::Result<()> {
    tracing::info!("scanning {} input(s)", paths.len());

    let mut failed = 0usize;
    let mut records = Vec::new();
    let results = scan_all(paths, kind, config);
    for (path, result) in &results {
        match result {
            Ok(outcome) => {
                for event in &outcome.events {
                    records.push((path.as_path(), event));
                }
            }
            Err(e) => {
                tracing::error!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_records(&mut out, &records, config.output).context("writing records")?;
    out.flush().context("writing records")?;

    if failed > 0 {
        anyhow::bail!("{} of {} input(s) could not be scanned", failed, paths.len());
    }
    Ok(())
}

fn output<'a>(path: &Path, event: &'a EventEnvelope) -> OutputRecord<'a> {
    OutputRecord {
        source: path.display().to_string(),
        event,
    }
}

fn write_records<W: Write>(
    out: &mut W,
    records: &[(&Path, &EventEnvelope)],
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let all: Vec<OutputRecord<'_>> = records
                .iter()
                .map(|&(path, event)| output(path, event))
                .collect();
            serde_json::to_writer_pretty(&mut *out, &all)?;
            writeln!(out)?;
        }
        OutputFormat::Jsonl => {
            for &(path, event) in records {
                serde_json::to_writer(&mut *out, &output(path, event))?;
                writeln!(out)?;
            }
        }
        OutputFormat::Text => {
            for (path, event) in records {
                writeln!(out, "{}: {}", path.display(), event)?;
            }
        }
    }
    Ok(())
}
