use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::codec::{CodecError, RespCodec};
use crate::config::Config;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::frame::Frame;
use crate::Error;

/// Binds the configured address and serves connections until `shutdown`
/// resolves.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let server = Server::bind(&config).await?;
    server.run_until(shutdown).await
}

/// A bound listener, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    codec: RespCodec,
    shutdown_grace: Duration,
}

impl Server {
    pub async fn bind(config: &Config) -> Result<Server, Error> {
        let listener = TcpListener::bind(config.bind_address()).await?;

        Ok(Server {
            listener,
            dispatcher: Dispatcher::default(),
            codec: RespCodec::new(config.max_frame_size),
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves or accepting fails.
    ///
    /// Once shutdown starts no new connections are accepted. Idle connections
    /// are closed, and connections in the middle of a request get up to the
    /// grace period to send their reply. The listening socket is released
    /// before this returns.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Server {
            listener,
            dispatcher,
            codec,
            shutdown_grace,
        } = self;

        info!("Redis server listening on {}", listener.local_addr()?);

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let result = tokio::select! {
            res = accept_loop(&listener, &dispatcher, &codec, &token, &tracker) => res,
            () = shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                Ok(())
            }
        };

        drop(listener);
        token.cancel();
        tracker.close();

        if tokio::time::timeout(shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                open_connections = tracker.len(),
                "Grace period elapsed with connections still open"
            );
        }

        info!("Server shutdown complete");
        result
    }
}

async fn accept_loop(
    listener: &TcpListener,
    dispatcher: &Dispatcher,
    codec: &RespCodec,
    token: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<(), Error> {
    loop {
        let (socket, client_address) = listener.accept().await.map_err(|e| {
            error!(error = %e, "Failed to accept connection");
            e
        })?;
        info!("Accepted connection from {:?}", client_address);

        let conn = Connection::new(socket, client_address, codec.clone());
        let dispatcher = dispatcher.clone();
        let shutdown = token.clone();

        tracker.spawn(async move {
            if let Err(e) = handle_connection(conn, dispatcher, shutdown).await {
                warn!(%client_address, error = %e, "Connection closed with error");
            }
        });
    }
}

#[instrument(
    name = "connection",
    skip(conn, dispatcher, shutdown),
    fields(connection_id = %conn.id, client_address = %conn.client_address)
)]
async fn handle_connection(
    mut conn: Connection,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> Result<(), CodecError> {
    loop {
        let read = tokio::select! {
            res = conn.read_command() => res,
            () = shutdown.cancelled(), if conn.is_idle() => {
                // Part of a request may have arrived while we were waiting.
                if conn.is_idle() {
                    info!("Server shutting down, closing idle connection");
                    return Ok(());
                }
                continue;
            }
        };

        let cmd = match read {
            Ok(Some(cmd)) => cmd,
            Ok(None) => break,
            Err(e) if e.is_protocol() => {
                // Best effort, the connection is dropped either way.
                let msg = format!("ERR {}", e).replace(['\r', '\n'], " ");
                let _ = conn.write_frame(Frame::error(msg)).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!("Received command: {:?}", cmd.to_strings());
        let res = dispatcher.dispatch(&cmd);
        debug!("Sending response to client: {}", res);

        conn.write_frame(res).await?;
    }

    info!("Connection closed");
    Ok(())
}
