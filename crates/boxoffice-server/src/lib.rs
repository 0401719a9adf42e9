//! Boxoffice production server.
//!
//! Ticketing server speaking the boxoffice text protocol over UDP and TCP on
//! one port, using Tokio for the async runtime and the system clock.
//!
//! # Architecture
//!
//! [`ServerDriver`] is the action-based core: it turns [`ServerEvent`]s into
//! [`ServerAction`]s and performs no I/O. [`Server`] reads datagrams and
//! accepts stream connections, feeds the driver and executes the actions.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`Dispatcher`]: Per-verb handlers over a [`Storage`] backend
//! - [`Server`]: Production runtime that executes driver actions
//! - [`SocketTransport`]: UDP socket and TCP listener sharing a port
//! - [`SystemEnv`]: Production environment (local wall clock)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dispatcher;
mod driver;
mod error;
pub mod ledger;
pub mod lifecycle;
mod locks;
mod registry;
mod server_error;
pub mod storage;
mod system_env;
mod transport;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use boxoffice_core::Environment;
use boxoffice_proto::DEFAULT_PORT;
pub use dispatcher::Dispatcher;
pub use driver::{LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use locks::{AccountLocks, EventLocks};
pub use registry::{ConnectionInfo, ConnectionTable};
pub use server_error::DriverError;
pub use storage::{
    ChaoticStorage, FsStorage, MemoryStorage, RedbStorage, Storage, StorageError, StorageOp,
};
pub use system_env::SystemEnv;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, UdpSocket},
};
pub use transport::SocketTransport;

/// File name of the redb database inside the data directory.
pub const REDB_FILE_NAME: &str = "boxoffice.redb";

/// Storage backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StorageBackend {
    /// Plain files under the data directory
    #[default]
    Fs,
    /// Embedded redb database in the data directory
    Redb,
    /// In-process maps, lost on exit
    Memory,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:58066")
    pub bind_address: String,
    /// Root of the persistent state
    pub data_dir: PathBuf,
    /// Storage backend
    pub backend: StorageBackend,
    /// Driver configuration (limits)
    pub driver: DriverConfig,
    /// How long a stream connection may take to deliver its request
    pub read_timeout: Duration,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            data_dir: PathBuf::from("."),
            backend: StorageBackend::default(),
            driver: DriverConfig::default(),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Production boxoffice server.
///
/// Wraps `ServerDriver` with Tokio sockets.
pub struct Server<E, S>
where
    E: Environment,
    S: Storage,
{
    /// The action-based server driver
    driver: Arc<ServerDriver<E, S>>,
    /// Bound sockets
    transport: SocketTransport,
    /// Per-connection read deadline
    read_timeout: Duration,
}

impl<E, S> Server<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create and bind a new server.
    pub async fn bind(config: ServerRuntimeConfig, env: E, storage: S) -> Result<Self, ServerError> {
        let driver = ServerDriver::new(env, storage, config.driver);
        let transport = SocketTransport::bind(&config.bind_address).await?;

        Ok(Self { driver: Arc::new(driver), transport, read_timeout: config.read_timeout })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Shared handle to the driver.
    pub fn driver(&self) -> Arc<ServerDriver<E, S>> {
        Arc::clone(&self.driver)
    }

    /// Run the server, answering datagrams and serving connections.
    ///
    /// This method runs until the task is dropped or a socket fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        let udp = self.transport.udp();

        loop {
            tokio::select! {
                received = self.transport.recv_datagram() => match received {
                    Ok((bytes, peer)) => {
                        let driver = Arc::clone(&self.driver);
                        let udp = Arc::clone(&udp);

                        tokio::spawn(async move {
                            let event = ServerEvent::DatagramReceived { peer, bytes };
                            if let Err(e) = process(driver, event, Some(udp.as_ref()), None).await {
                                tracing::warn!("Datagram from {} failed: {}", peer, e);
                            }
                        });
                    },
                    Err(e) => tracing::error!("Receive error: {}", e),
                },

                accepted = self.transport.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
            }
        }
    }

    /// Admits or refuses a fresh stream connection.
    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let actions = match self.driver.process_event(ServerEvent::ConnectionAccepted { peer }) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::error!("Admission of {} failed: {}", peer, e);
                return;
            },
        };

        let mut stream = Some(stream);
        for action in actions {
            match action {
                ServerAction::AdmitConnection { connection_id, .. } => {
                    if let Some(stream) = stream.take() {
                        let driver = Arc::clone(&self.driver);
                        let timeout = self.read_timeout;
                        tokio::spawn(handle_connection(driver, stream, connection_id, timeout));
                    }
                },
                ServerAction::RejectConnection { .. } => {
                    // Dropping the stream closes it without a reply.
                    drop(stream.take());
                },
                other => log_action(other),
            }
        }
    }
}

/// Serve the single request of an admitted connection.
async fn handle_connection<E, S>(
    driver: Arc<ServerDriver<E, S>>,
    mut stream: TcpStream,
    connection_id: u64,
    timeout: Duration,
) where
    E: Environment,
    S: Storage,
{
    let reason = match transport::read_request(&mut stream, driver.decoder_limits(), timeout).await
    {
        Ok(request) => {
            let event = ServerEvent::RequestReceived { connection_id, request };
            match process(Arc::clone(&driver), event, None, Some(&mut stream)).await {
                Ok(()) => "served".to_string(),
                Err(e) => failure_reason(connection_id, &e),
            }
        },
        Err(e) => failure_reason(connection_id, &e),
    };

    // Always release the slot, whatever happened above.
    match driver.process_event(ServerEvent::ConnectionClosed { connection_id, reason }) {
        Ok(actions) => actions.into_iter().for_each(log_action),
        Err(e) => tracing::error!("Release of connection {} failed: {}", connection_id, e),
    }
}

fn failure_reason(connection_id: u64, err: &ServerError) -> String {
    if !err.is_connection_scoped() {
        tracing::error!("Connection {} failed: {}", connection_id, err);
    }
    err.to_string()
}

/// Run one event through the driver off the async threads, then execute
/// the resulting actions.
async fn process<E, S>(
    driver: Arc<ServerDriver<E, S>>,
    event: ServerEvent,
    udp: Option<&UdpSocket>,
    stream: Option<&mut TcpStream>,
) -> Result<(), ServerError>
where
    E: Environment,
    S: Storage,
{
    let actions = tokio::task::spawn_blocking(move || driver.process_event(event))
        .await
        .map_err(|e| ServerError::Transport(format!("request task failed: {e}")))??;

    execute_actions(actions, udp, stream).await
}

/// Execute server actions.
async fn execute_actions(
    actions: Vec<ServerAction>,
    udp: Option<&UdpSocket>,
    mut stream: Option<&mut TcpStream>,
) -> Result<(), ServerError> {
    for action in actions {
        match action {
            ServerAction::SendDatagram { peer, bytes } => {
                if let Some(udp) = udp {
                    if let Err(e) = udp.send_to(&bytes, peer).await {
                        tracing::warn!("SendDatagram to {} failed: {}", peer, e);
                    }
                } else {
                    tracing::warn!("SendDatagram: no socket for {}", peer);
                }
            },

            ServerAction::WriteResponse { connection_id, bytes } => match stream.as_deref_mut() {
                Some(stream) => transport::write_response(stream, &bytes).await?,
                None => tracing::warn!("WriteResponse: connection {} has no stream", connection_id),
            },

            ServerAction::CloseConnection { connection_id, reason } => {
                tracing::debug!("Closing connection {}: {}", connection_id, reason);
                if let Some(stream) = stream.as_deref_mut() {
                    // The peer may already be gone.
                    let _ = stream.shutdown().await;
                }
            },

            other => log_action(other),
        }
    }

    Ok(())
}

/// Emit a `Log` action through tracing. Other actions need a socket and are
/// reported as misrouted.
fn log_action(action: ServerAction) {
    match action {
        ServerAction::Log { level, message } => match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        },
        other => tracing::warn!("Action {:?} cannot be executed here", other),
    }
}

/// Open the configured backend, bind and serve until the task is dropped.
pub async fn serve(config: ServerRuntimeConfig) -> Result<(), ServerError> {
    let env = SystemEnv::new();

    match config.backend {
        StorageBackend::Fs => {
            let storage = FsStorage::open(&config.data_dir).map_err(|e| {
                ServerError::Config(format!("cannot open {}: {e}", config.data_dir.display()))
            })?;
            tracing::info!("Using file storage under {}", config.data_dir.display());
            Server::bind(config, env, storage).await?.run().await
        },
        StorageBackend::Redb => {
            std::fs::create_dir_all(&config.data_dir).map_err(|e| {
                ServerError::Config(format!("cannot create {}: {e}", config.data_dir.display()))
            })?;
            let path = config.data_dir.join(REDB_FILE_NAME);
            let storage = RedbStorage::open(&path).map_err(|e| {
                ServerError::Config(format!("cannot open {}: {e}", path.display()))
            })?;
            tracing::info!("Using redb storage at {}", path.display());
            Server::bind(config, env, storage).await?.run().await
        },
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, state is lost on exit");
            Server::bind(config, env, MemoryStorage::new()).await?.run().await
        },
    }
}
