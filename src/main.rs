//! Command-line front end for instrument sessions over OS serial ports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use instrument_link::transport::SerialPortTransport;
use instrument_link::{LinkConfig, ScanFormat, Session};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    /// TOML configuration file; environment overrides still apply
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Serial number of the bridge to open.
    /// Optional; without it the first device of the configured family is used.
    #[arg(long, short)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List bridges reporting the vendor fingerprint
    List,
    /// Print the instrument identification string
    Idn,
    /// Send a command and print the cleaned response
    Query {
        /// Command text, without terminator
        command: String,
        /// Response wait budget (e.g. "500ms", "2s")
        #[arg(long, value_parser = humantime_duration)]
        wait: Option<Duration>,
        /// Print the raw frame as hex instead of text
        #[arg(long)]
        raw: bool,
    },
    /// Send a command without reading a response
    Write {
        /// Command text, without terminator
        command: String,
    },
    /// Retrieve the samples of the last scan
    Scan {
        /// Command dialect used for retrieval
        #[arg(long, value_enum, default_value_t = Dialect::Santec)]
        dialect: Dialect,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Dialect {
    Scpi,
    Santec,
}

impl From<Dialect> for ScanFormat {
    fn from(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Scpi => ScanFormat::Scpi,
            Dialect::Santec => ScanFormat::Santec,
        }
    }
}

fn humantime_duration(value: &str) -> Result<Duration, String> {
    value
        .parse::<humantime_serde::re::humantime::Duration>()
        .map(Into::into)
        .map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LinkConfig::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => LinkConfig::from_env().context("failed to load configuration")?,
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut session = Session::new(SerialPortTransport::new(), config);

    if let Command::List = cli.command {
        let devices = session
            .list_devices()
            .await
            .context("failed to enumerate bridges")?;
        if devices.is_empty() {
            println!("no matching devices");
        }
        for device in devices {
            println!("{}", device);
        }
        return Ok(());
    }

    let device = session
        .open(cli.serial.as_deref())
        .await
        .context("failed to open instrument")?;
    info!(serial_number = %device.serial_number, "connected");

    let outcome = run(&mut session, cli.command).await;
    session.close().await.context("failed to close instrument")?;
    outcome
}

async fn run(session: &mut Session<SerialPortTransport>, command: Command) -> Result<()> {
    match command {
        Command::List => {}
        Command::Idn => {
            let idn = session.query_idn().await.context("identification query failed")?;
            println!("{}", idn);
        }
        Command::Query { command, wait, raw } => {
            let wait = wait.unwrap_or(session.config().framing.query_wait);
            if raw {
                let frame = session
                    .query_raw(&command, wait)
                    .await
                    .with_context(|| format!("query {:?} failed", command))?;
                let hex: Vec<String> = frame.iter().map(|b| format!("{:02X}", b)).collect();
                println!("{}", hex.join(" "));
            } else {
                let answer = session
                    .query(&command, wait)
                    .await
                    .with_context(|| format!("query {:?} failed", command))?;
                println!("{}", answer);
            }
        }
        Command::Write { command } => {
            session
                .write(&command)
                .await
                .with_context(|| format!("write {:?} failed", command))?;
        }
        Command::Scan { dialect } => {
            let data = session
                .fetch_scan(dialect.into())
                .await
                .context("scan retrieval failed")?;
            info!(samples = data.len(), "scan complete");
            for sample in data.to_f64() {
                println!("{}", sample);
            }
        }
    }
    Ok(())
}
