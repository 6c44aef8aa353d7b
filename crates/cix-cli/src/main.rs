//! CIX CLI
//!
//! Scans files and builds project indexes in-process, and talks to a
//! running `cix-driver` over TCP.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cix_core::DriverConfig;
use cix_indexer::{to_cix, Database, ScannerRegistry};
use cix_ipc::{DriverClient, Response, ResponseData};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cix")]
#[command(about = "CIX - code intelligence indexer")]
#[command(version)]
struct Cli {
    /// Database base directory (default: the platform data directory)
    #[arg(long, global = true)]
    db_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one file and print its symbol tree as CIX
    Scan {
        file: PathBuf,

        /// Language name; detected from the file when omitted
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Rebuild and save a project's index
    Index {
        /// Project path (default: current directory)
        #[arg(default_value = ".")]
        project: PathBuf,

        /// Walk one top-level directory at a time
        #[arg(long)]
        nice: bool,
    },

    /// Print the CIX of a module or top-level symbol
    Blob {
        project: PathBuf,
        language: String,
        name: String,
    },

    /// List completions for a dotted expression
    Complete {
        project: PathBuf,
        language: String,

        #[arg(default_value = "")]
        expr: String,

        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Check that a driver is answering
    Ping {
        #[arg(long)]
        connect: String,
    },

    /// Show driver status
    Status {
        #[arg(long)]
        connect: String,
    },

    /// Ask a driver to save its indexes and exit
    Stop {
        #[arg(long)]
        connect: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let db_root = db_root(cli.db_dir);

    match cli.command {
        Commands::Scan { file, language } => cmd_scan(&file, language.as_deref()),
        Commands::Index { project, nice } => cmd_index(&db_root, &project, nice),
        Commands::Blob {
            project,
            language,
            name,
        } => cmd_blob(&db_root, &project, &language, &name),
        Commands::Complete {
            project,
            language,
            expr,
            prefix,
        } => cmd_complete(&db_root, &project, &language, &expr, &prefix),
        Commands::Ping { connect } => cmd_ping(&connect).await,
        Commands::Status { connect } => cmd_status(&connect).await,
        Commands::Stop { connect } => cmd_stop(&connect).await,
    }
}

fn db_root(db_dir: Option<PathBuf>) -> PathBuf {
    let mut config = DriverConfig::default();
    if let Some(dir) = db_dir {
        config.db_base_dir = dir;
    }
    config.db_root()
}

fn database(db_root: &Path) -> Database {
    Database::new(db_root, Arc::new(ScannerRegistry::with_defaults()))
}

fn cmd_scan(file: &Path, language: Option<&str>) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let registry = ScannerRegistry::with_defaults();

    let language = match language {
        Some(name) => match registry.get(name) {
            Some(scanner) => scanner.language(),
            None => bail!("Unsupported language: {}", name),
        },
        None => registry
            .detect(file, &content)
            .with_context(|| format!("Cannot detect the language of {}", file.display()))?,
    };

    let output = registry.try_scan(&content, file, language)?;
    for error in &output.errors {
        eprintln!(
            "{}:{}:{}: {}",
            file.display(),
            error.line,
            error.column,
            error.message
        );
    }
    print!("{}", to_cix(&output.tree));
    Ok(())
}

fn cmd_index(db_root: &Path, project: &Path, nice: bool) -> Result<()> {
    let database = database(db_root);
    let zone = database.zone(project)?;

    let started = std::time::Instant::now();
    let stats = zone.update(nice)?;
    zone.save()?;

    println!("✓ Indexed {}", zone.project().display());
    println!("  Files:      {}", stats.files);
    println!("  Basenames:  {}", stats.basenames);
    println!("  Chunks:     {}", stats.chunks);
    println!("  Took:       {:.2}s", started.elapsed().as_secs_f64());
    println!("  Index:      {}", zone.dir().display());
    Ok(())
}

fn cmd_blob(db_root: &Path, project: &Path, language: &str, name: &str) -> Result<()> {
    let database = database(db_root);
    let zone = database.zone(project)?;

    match zone.try_get_blob(language, name)? {
        Some(blob) => print!("{}", to_cix(&blob)),
        None => bail!("No {} blob named {}", language, name),
    }
    Ok(())
}

fn cmd_complete(
    db_root: &Path,
    project: &Path,
    language: &str,
    expr: &str,
    prefix: &str,
) -> Result<()> {
    let database = database(db_root);
    let zone = database.zone(project)?;

    for completion in zone.completions(language, expr, prefix)? {
        println!("{}\t{}", completion.name, completion.kind.tag());
    }
    Ok(())
}

async fn connect(address: &str) -> Result<DriverClient<cix_ipc::BoxedReader, cix_ipc::BoxedWriter>> {
    DriverClient::connect(address)
        .await
        .with_context(|| format!("No driver listening on {}", address))
}

async fn cmd_ping(address: &str) -> Result<()> {
    let mut client = connect(address).await?;

    let start = std::time::Instant::now();
    client.ping().await?;
    println!("✓ Pong! ({:.2}ms)", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}

async fn cmd_status(address: &str) -> Result<()> {
    let mut client = connect(address).await?;

    match client.status().await? {
        ResponseData::Status {
            version,
            uptime_secs,
            queue_depth,
            zones_loaded,
            workers,
            requests_total,
            requests_failed,
            avg_latency_ms,
        } => {
            println!("CIX Driver v{}", version);
            println!();
            println!("  Uptime:      {}", format_duration(uptime_secs));
            println!("  Workers:     {}", workers);
            println!("  Queued:      {}", queue_depth);
            println!("  Projects:    {} loaded", zones_loaded);
            println!();
            println!("  Requests:    {} ({} failed)", requests_total, requests_failed);
            println!("  Avg Latency: {}ms", avg_latency_ms);
        }
        other => bail!("Unexpected status response: {:?}", other),
    }
    Ok(())
}

async fn cmd_stop(address: &str) -> Result<()> {
    let mut client = connect(address).await?;

    match client.shutdown().await? {
        Response::Ok { .. } => println!("✓ Driver saved its indexes and stopped."),
        Response::Error { message, .. } => bail!("Shutdown failed: {}", message),
    }
    Ok(())
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
