use std::time::Duration;

use clap::Parser;
use redis_clone::codec::DEFAULT_MAX_FRAME_SIZE;
use redis_clone::config::{Config, DEFAULT_HOST, DEFAULT_PORT};
use redis_clone::{server, Error};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The host to bind to. Loopback by default; use 0.0.0.0 to listen on every
    /// interface
    #[arg(long, env = "BIND_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// The port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Largest request, in bytes, a client may send
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Milliseconds open connections get to finish on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value_t = 1000)]
    shutdown_grace_ms: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            host: args.host,
            port: args.port,
            max_frame_size: args.max_frame_size,
            shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(args.into(), shutdown_signal()).await
}
