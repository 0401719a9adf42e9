//! Boxoffice server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default port, state in the current directory
//! boxoffice-server
//!
//! # Another port, redb storage, debug logging
//! boxoffice-server -p 59000 --storage redb --data-dir /var/lib/boxoffice -v
//! ```

use std::{path::PathBuf, time::Duration};

use boxoffice_proto::{DEFAULT_MAX_DESCRIPTION_BYTES, DEFAULT_PORT};
use boxoffice_server::{DriverConfig, ServerRuntimeConfig, StorageBackend};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Boxoffice ticketing server
#[derive(Parser, Debug)]
#[command(name = "boxoffice-server")]
#[command(about = "Event ticketing server over UDP and TCP")]
#[command(version)]
struct Args {
    /// Port shared by the UDP and TCP listeners
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Log every request (same as --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding persistent state
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = StorageBackend::Fs)]
    storage: StorageBackend,

    /// Maximum concurrently served TCP connections
    #[arg(long, default_value = "10")]
    max_connections: usize,

    /// Largest event description accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_DESCRIPTION_BYTES)]
    max_description_bytes: u64,

    /// Seconds a TCP client has to deliver its request
    #[arg(long, default_value = "30")]
    read_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let bind_address = format!("{}:{}", args.bind, args.port);
    tracing::info!("Boxoffice server starting");
    tracing::info!("Binding to {}", bind_address);

    let config = ServerRuntimeConfig {
        bind_address,
        data_dir: args.data_dir,
        backend: args.storage,
        driver: DriverConfig {
            max_connections: args.max_connections,
            max_description_bytes: args.max_description_bytes,
            ..Default::default()
        },
        read_timeout: Duration::from_secs(args.read_timeout_secs),
    };

    tokio::select! {
        result = boxoffice_server::serve(config) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}
