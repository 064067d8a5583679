//! # Relata Server Binary
//!
//! One executable, four roles:
//!
//! ```bash
//! # everything in one process
//! relata start -p 8080 -d ./data -c app.rl -s ./tx.state
//!
//! # or distributed
//! relata tx   -p 7070 -c app.rl -s ./tx.state
//! relata vol  -p 7071 -d ./data -t host:7070
//! relata exec -p 8080 -t host:7070
//!
//! # program converter (v4 syntax on stdin, v5 on stdout)
//! relata convert < app-v4.rl > app.rl
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relata::config::Config;
use relata::coordinator::{self, CoordClient, Coordinator};
use relata::executor;
use relata::volume::Volume;

#[derive(Parser)]
#[command(name = "relata", version, about = "A small distributed relational database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Coordinator, volume and executor in one process
    Start {
        /// HTTP port to serve functions on
        #[arg(short = 'p')]
        port: u16,
        /// Volume data directory
        #[arg(short = 'd')]
        data: PathBuf,
        /// Program source file
        #[arg(short = 'c')]
        source: PathBuf,
        /// Coordinator state file
        #[arg(short = 's')]
        state: PathBuf,
    },
    /// Transaction coordinator
    Tx {
        #[arg(short = 'p')]
        port: u16,
        /// Program source file
        #[arg(short = 'c')]
        source: PathBuf,
        /// Coordinator state file
        #[arg(short = 's')]
        state: PathBuf,
    },
    /// Storage volume
    Vol {
        #[arg(short = 'p')]
        port: u16,
        /// Volume data directory
        #[arg(short = 'd')]
        data: PathBuf,
        /// Coordinator address (host:port)
        #[arg(short = 't')]
        tx: String,
    },
    /// HTTP executor
    Exec {
        #[arg(short = 'p')]
        port: u16,
        /// Coordinator address (host:port)
        #[arg(short = 't')]
        tx: String,
    },
    /// Rewrite a v4 program to the v5 syntax (stdin to stdout)
    Convert,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("using default configuration ({e})");
        Config::default()
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Start { port, data, source, state } => {
            let text = fs::read_to_string(&source)
                .with_context(|| format!("cannot read {}", source.display()))?;
            let coord = Arc::new(Coordinator::new(text, &state)?);
            let tx_addr = coordinator::spawn_server(coord, 0)?;

            let client = CoordClient::attach(&tx_addr)?;
            let sync = Duration::from_secs(config.volume.sync_interval_secs);
            let _vol = Volume::start(&data, 0, client, sync)?;

            executor::multiplex(port, &tx_addr, &config.server)
        }

        Command::Tx { port, source, state } => {
            let text = fs::read_to_string(&source)
                .with_context(|| format!("cannot read {}", source.display()))?;
            let coord = Arc::new(Coordinator::new(text, &state)?);
            let listener = std::net::TcpListener::bind(("0.0.0.0", port))
                .with_context(|| format!("cannot bind coordinator port {port}"))?;
            tracing::info!(port, "coordinator started");
            coordinator::serve(coord, listener);
            Ok(())
        }

        Command::Vol { port, data, tx } => {
            let client = CoordClient::attach(&tx)
                .with_context(|| format!("cannot attach to the coordinator at {tx}"))?;
            let sync = Duration::from_secs(config.volume.sync_interval_secs);
            let _vol = Volume::start(&data, port, client, sync)?;
            loop {
                std::thread::park();
            }
        }

        Command::Exec { port, tx } => executor::multiplex(port, &tx, &config.server),

        Command::Convert => relata::convert::run(),
    }
}
