//! Server driver.
//!
//! Ties together the connection table, request decoding results and the
//! [`Dispatcher`]. The driver performs no I/O: the runtime feeds it
//! [`ServerEvent`]s and executes the [`ServerAction`]s it returns.
//!
//! The driver is shared between connection tasks, so `process_event` takes
//! `&self`. Ordering between requests is provided by the dispatcher's event
//! and account locks.

#![allow(clippy::disallowed_types, reason = "Synchronous critical sections only")]

use std::{
    net::SocketAddr,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use boxoffice_core::Environment;
use boxoffice_proto::{
    DEFAULT_MAX_DESCRIPTION_BYTES, DecoderLimits, MAX_HEADER_BYTES, ProtocolError, Request,
    Response, Status, Transport, decode_datagram,
};
use bytes::Bytes;

use crate::{
    dispatcher::{self, Dispatcher},
    registry::ConnectionTable,
    server_error::DriverError,
    storage::Storage,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrently served stream connections
    pub max_connections: usize,
    /// Largest `CRE` description accepted
    pub max_description_bytes: u64,
    /// Longest request header accepted
    pub max_header_bytes: usize,
    /// Records listed in an `LMR` reply
    pub max_reservations_listed: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_description_bytes: DEFAULT_MAX_DESCRIPTION_BYTES,
            max_header_bytes: MAX_HEADER_BYTES,
            max_reservations_listed: 50,
        }
    }
}

impl ServerConfig {
    /// Limits for the stream request decoder.
    pub fn decoder_limits(&self) -> DecoderLimits {
        DecoderLimits {
            max_header_bytes: self.max_header_bytes,
            max_payload_bytes: self.max_description_bytes,
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the runtime.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A datagram arrived
    DatagramReceived {
        /// Sender
        peer: SocketAddr,
        /// Raw datagram
        bytes: Bytes,
    },

    /// A stream connection was accepted by the listener
    ConnectionAccepted {
        /// Remote address
        peer: SocketAddr,
    },

    /// The request of an admitted connection was read (or failed to parse)
    RequestReceived {
        /// Connection that sent the request
        connection_id: u64,
        /// Decoded request, or why decoding failed
        request: Result<Request, ProtocolError>,
    },

    /// A connection finished (reply written, peer gone, or error)
    ConnectionClosed {
        /// Connection that was closed
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },
}

/// Actions that the server driver produces.
///
/// These are executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Send a datagram reply
    SendDatagram {
        /// Destination
        peer: SocketAddr,
        /// Encoded reply
        bytes: Bytes,
    },

    /// Serve a newly accepted connection
    AdmitConnection {
        /// Id assigned to the connection
        connection_id: u64,
        /// Table slot it occupies
        slot: usize,
    },

    /// Drop a newly accepted connection without reading from it
    RejectConnection {
        /// Remote address
        peer: SocketAddr,
        /// Reason for the rejection
        reason: String,
    },

    /// Write a reply on a connection
    WriteResponse {
        /// Target connection
        connection_id: u64,
        /// Encoded reply
        bytes: Bytes,
    },

    /// Close a connection
    CloseConnection {
        /// Connection to close
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
pub struct ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Verb handlers
    dispatcher: Dispatcher<E, S>,
    /// Admitted stream connections
    connections: Mutex<ConnectionTable>,
    /// Next connection id to hand out
    next_connection_id: AtomicU64,
    /// Server configuration
    config: ServerConfig,
}

impl<E, S> ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a new server driver.
    pub fn new(env: E, storage: S, config: ServerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(env, storage, config.max_reservations_listed),
            connections: Mutex::new(ConnectionTable::new(config.max_connections)),
            next_connection_id: AtomicU64::new(1),
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    pub fn process_event(&self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        match event {
            ServerEvent::DatagramReceived { peer, bytes } => {
                Ok(self.handle_datagram(peer, &bytes))
            },
            ServerEvent::ConnectionAccepted { peer } => Ok(self.handle_connection_accepted(peer)),
            ServerEvent::RequestReceived { connection_id, request } => {
                self.handle_request_received(connection_id, request)
            },
            ServerEvent::ConnectionClosed { connection_id, reason } => {
                self.handle_connection_closed(connection_id, &reason)
            },
        }
    }

    fn handle_datagram(&self, peer: SocketAddr, bytes: &[u8]) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let response = match decode_datagram(bytes) {
            Ok(request) => self.serve(Transport::Datagram, peer, request, &mut actions),
            Err(err) => refuse(Transport::Datagram, peer, &err, &mut actions),
        };
        actions.push(ServerAction::SendDatagram { peer, bytes: response.to_bytes() });
        actions
    }

    fn handle_connection_accepted(&self, peer: SocketAddr) -> Vec<ServerAction> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);

        match connections.admit(connection_id, peer) {
            Some(slot) => vec![
                ServerAction::AdmitConnection { connection_id, slot },
                ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("connection {connection_id} from {peer} admitted to slot {slot}"),
                },
            ],
            None => vec![
                ServerAction::RejectConnection {
                    peer,
                    reason: "max connections exceeded".to_string(),
                },
                ServerAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "connection from {peer} rejected: all {} slots busy",
                        connections.capacity()
                    ),
                },
            ],
        }
    }

    fn handle_request_received(
        &self,
        connection_id: u64,
        request: Result<Request, ProtocolError>,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let peer = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .map(|info| info.peer)
            .ok_or(DriverError::UnknownConnection(connection_id))?;

        let mut actions = Vec::new();
        let response = match request {
            Ok(request) => self.serve(Transport::Stream, peer, request, &mut actions),
            Err(err @ ProtocolError::Truncated { .. }) => {
                actions.push(ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("TCP request from {peer} dropped: {err}"),
                });
                actions.push(ServerAction::CloseConnection {
                    connection_id,
                    reason: "request truncated".to_string(),
                });
                return Ok(actions);
            },
            Err(err) => refuse(Transport::Stream, peer, &err, &mut actions),
        };

        actions.push(ServerAction::WriteResponse { connection_id, bytes: response.to_bytes() });
        actions.push(ServerAction::CloseConnection {
            connection_id,
            reason: "reply sent".to_string(),
        });
        Ok(actions)
    }

    fn handle_connection_closed(
        &self,
        connection_id: u64,
        reason: &str,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let info = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(connection_id)
            .ok_or(DriverError::UnknownConnection(connection_id))?;

        Ok(vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection {connection_id} from {} closed: {reason}", info.peer),
        }])
    }

    /// Runs a decoded request. Handler failures become the verb's `NOK`.
    fn serve(
        &self,
        transport: Transport,
        peer: SocketAddr,
        request: Request,
        actions: &mut Vec<ServerAction>,
    ) -> Response {
        let verb = request.verb();
        let message = match dispatcher::account_of(&request) {
            Some(uid) => format!("{transport} {verb} from {peer} (uid {uid})"),
            None => format!("{transport} {verb} from {peer}"),
        };
        actions.push(ServerAction::Log { level: LogLevel::Debug, message });

        match self.dispatcher.handle(request) {
            Ok(response) => response,
            Err(err) => {
                actions.push(ServerAction::Log {
                    level: LogLevel::Error,
                    message: format!("{verb} from {peer} failed: {err}"),
                });
                Response::status(verb, Status::Nok)
            },
        }
    }

    /// Number of admitted connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Limits for decoding stream requests.
    pub fn decoder_limits(&self) -> DecoderLimits {
        self.config.decoder_limits()
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        self.dispatcher.storage()
    }

    /// Environment.
    pub fn env(&self) -> &E {
        self.dispatcher.env()
    }
}

/// Reply for a request that failed to decode.
fn refuse(
    transport: Transport,
    peer: SocketAddr,
    err: &ProtocolError,
    actions: &mut Vec<ServerAction>,
) -> Response {
    actions.push(ServerAction::Log {
        level: LogLevel::Debug,
        message: format!("malformed {transport} request from {peer}: {err}"),
    });
    match err.reply_verb() {
        Some(verb) => Response::status(verb, Status::Err),
        None => Response::Error,
    }
}

impl<E, S> std::fmt::Debug for ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connection_count", &self.connection_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
