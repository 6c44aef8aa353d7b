//! CIX Driver binary
//!
//! Logs go to stderr or a log file; stdout carries nothing but frames when
//! the transport is stdio.

use anyhow::{Context, Result};
use cix_core::{DriverConfig, TransportConfig};
use cix_daemon::limits::{self, Reservation};
use cix_daemon::{wait_for_shutdown, Driver, Engine, Exit};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cix-driver")]
#[command(about = "CIX code intelligence driver")]
#[command(version)]
struct Args {
    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database base directory
    #[arg(long)]
    db_dir: Option<PathBuf>,

    /// Dial out to a front-end at HOST:PORT instead of using stdio
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "listen")]
    connect: Option<String>,

    /// Accept one connection on HOST:PORT instead of using stdio
    #[arg(long, value_name = "HOST:PORT")]
    listen: Option<String>,

    /// Worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Log directive, e.g. `cix_indexer=debug` (repeatable)
    #[arg(long = "log", value_name = "DIRECTIVE")]
    log: Vec<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Keep normal CPU and I/O priority
    #[arg(long)]
    no_nice: bool,
}

impl Args {
    /// Config file, if any, overridden by flags.
    fn into_config(self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::load_from(path)?,
            None => DriverConfig::default(),
        };

        if let Some(dir) = self.db_dir {
            config.db_base_dir = dir;
        }
        if let Some(address) = self.connect {
            config.transport = TransportConfig::Tcp {
                address,
                listen: false,
            };
        }
        if let Some(address) = self.listen {
            config.transport = TransportConfig::Tcp {
                address,
                listen: true,
            };
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.log_filter.extend(self.log);
        if self.log_file.is_some() {
            config.log_file = self.log_file;
        }
        if self.no_nice {
            config.lower_priority = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &DriverConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))
        .context("Invalid log filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run(config: DriverConfig) -> Result<Exit> {
    if config.lower_priority {
        if let Err(e) = limits::lower_cpu_priority() {
            tracing::warn!(error = %e, "Failed to lower CPU priority");
        }
        if let Err(e) = limits::lower_io_priority() {
            tracing::warn!(error = %e, "Failed to lower I/O priority");
        }
    }

    let _reservation = match Reservation::reserve(config.memory_reserve_bytes) {
        Ok(reservation) => Some(reservation),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to reserve address space");
            None
        }
    };

    let (reader, writer) = match &config.transport {
        TransportConfig::Stdio => cix_ipc::stdio(),
        TransportConfig::Tcp {
            address,
            listen: false,
        } => cix_ipc::connect_tcp(address)
            .await
            .with_context(|| format!("Failed to connect to {}", address))?,
        TransportConfig::Tcp {
            address,
            listen: true,
        } => {
            let listener = TcpListener::bind(address)
                .await
                .with_context(|| format!("Failed to listen on {}", address))?;
            tracing::info!(address = %listener.local_addr()?, "Waiting for a connection");
            cix_ipc::listen_tcp(&listener).await?
        }
    };

    tracing::info!(
        db = %config.db_root().display(),
        workers = config.workers,
        "Driver starting"
    );
    let driver = Driver::new(Arc::new(Engine::new(&config)));
    let exit = driver.serve(reader, writer, wait_for_shutdown()).await?;
    Ok(exit)
}

fn main() -> ExitCode {
    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cix-driver: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config) {
        eprintln!("cix-driver: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!("Starting CIX driver v{}", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(exit) => {
            tracing::info!(exit = ?exit, "Driver stopped");
            ExitCode::from(exit.code())
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
