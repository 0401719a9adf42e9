//! Tokio socket transport.
//!
//! The server listens for datagrams and stream connections on the same port.
//! A stream connection carries exactly one request: the client writes it and
//! the server replies, then closes.
//!
//! Binding happens TCP first, then UDP on the port the listener got. When the
//! caller asks for an ephemeral port and the UDP side of it is taken, binding
//! is retried with a fresh port.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use boxoffice_proto::{DecoderLimits, MAX_DATAGRAM_BYTES, ProtocolError, Request, StreamDecoder};
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
};

use crate::error::ServerError;

/// Attempts made when binding an ephemeral port.
const EPHEMERAL_BIND_ATTEMPTS: usize = 8;

/// Paired UDP socket and TCP listener sharing one port.
#[derive(Debug)]
pub struct SocketTransport {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
}

impl SocketTransport {
    /// Bind both sockets to `address`.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let attempts = if addr.port() == 0 { EPHEMERAL_BIND_ATTEMPTS } else { 1 };
        let mut last_error = None;

        for _ in 0..attempts {
            let tcp = TcpListener::bind(addr)
                .await
                .map_err(|e| ServerError::Transport(format!("failed to bind TCP {addr}: {e}")))?;
            let bound = tcp.local_addr()?;

            match UdpSocket::bind(bound).await {
                Ok(udp) => {
                    tracing::info!("listening on {} (UDP and TCP)", bound);
                    return Ok(Self { udp: Arc::new(udp), tcp });
                },
                Err(e) => {
                    tracing::debug!("UDP bind on {} failed: {}", bound, e);
                    last_error = Some(e);
                },
            }
        }

        Err(ServerError::Transport(format!(
            "failed to bind UDP next to TCP on {addr}: {}",
            last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
        )))
    }

    /// Local address both sockets are bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.tcp
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Shared handle to the datagram socket.
    pub fn udp(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.udp)
    }

    /// Receive one datagram.
    pub async fn recv_datagram(&self) -> Result<(Bytes, SocketAddr), ServerError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let (len, peer) = self
            .udp
            .recv_from(&mut buf)
            .await
            .map_err(|e| ServerError::Transport(format!("recv_from failed: {e}")))?;
        buf.truncate(len);
        Ok((Bytes::from(buf), peer))
    }

    /// Accept a stream connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        self.tcp
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))
    }
}

/// Read the single request of a stream connection.
///
/// The outer error means no reply is possible: the read failed, timed out or
/// the peer closed without sending anything. The inner result is what the
/// decoder made of the bytes.
pub async fn read_request(
    stream: &mut TcpStream,
    limits: DecoderLimits,
    timeout: Duration,
) -> Result<Result<Request, ProtocolError>, ServerError> {
    let mut decoder = StreamDecoder::new(limits);
    let mut buf = BytesMut::with_capacity(limits.max_header_bytes);

    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(request)) => return Ok(Ok(request)),
            Ok(None) => {},
            Err(err) => return Ok(Err(err)),
        }

        let read = tokio::time::timeout(timeout, stream.read_buf(&mut buf))
            .await
            .map_err(|_| ServerError::Transport(format!("no request within {timeout:?}")))?
            .map_err(|e| ServerError::Transport(format!("read failed: {e}")))?;

        if read == 0 {
            return match decoder.decode_eof(&mut buf) {
                Ok(Some(request)) => Ok(Ok(request)),
                Ok(None) => {
                    Err(ServerError::Protocol("peer closed before sending a request".to_string()))
                },
                Err(err) => Ok(Err(err)),
            };
        }
    }
}

/// Write a reply and shut down the write half.
pub async fn write_response(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), ServerError> {
    stream
        .write_all(bytes)
        .await
        .map_err(|e| ServerError::Transport(format!("write failed: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| ServerError::Transport(format!("shutdown failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_proto::Verb;

    use super::*;

    async fn pair(transport: &SocketTransport) -> (TcpStream, TcpStream) {
        let client = TcpStream::connect(transport.local_addr().unwrap());
        let (client, accepted) = tokio::join!(client, transport.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn transport_binds_both_sockets_on_one_port() {
        let transport = SocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        assert_ne!(addr.port(), 0, "Should have assigned a port");
        assert_eq!(transport.udp().local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn transport_rejects_invalid_address() {
        let result = SocketTransport::bind("invalid:address:format").await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn datagram_round_trip() {
        let transport = SocketTransport::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(b"LIN 123456 pass1234\n", transport.local_addr().unwrap()).await.unwrap();
        let (bytes, peer) = transport.recv_datagram().await.unwrap();

        assert_eq!(&bytes[..], b"LIN 123456 pass1234\n");
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn reads_request_split_across_writes() {
        let transport = SocketTransport::bind("127.0.0.1:0").await.unwrap();
        let (mut client, mut server) = pair(&transport).await;

        client.write_all(b"SE").await.unwrap();
        client.flush().await.unwrap();
        client.write_all(b"D 001\n").await.unwrap();

        let request = read_request(&mut server, DecoderLimits::default(), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.verb(), Verb::Sed);
    }

    #[tokio::test]
    async fn short_payload_is_truncated() {
        let transport = SocketTransport::bind("127.0.0.1:0").await.unwrap();
        let (mut client, mut server) = pair(&transport).await;

        client
            .write_all(b"CRE 123456 pass1234 Conf 01-01-2031 10:00 100 d.txt 10 abc")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let result = read_request(&mut server, DecoderLimits::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[tokio::test]
    async fn empty_connection_is_a_protocol_error() {
        let transport = SocketTransport::bind("127.0.0.1:0").await.unwrap();
        let (mut client, mut server) = pair(&transport).await;
        client.shutdown().await.unwrap();

        let result =
            read_request(&mut server, DecoderLimits::default(), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ServerError::Protocol(_))));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let transport = SocketTransport::bind("127.0.0.1:0").await.unwrap();
        let (_client, mut server) = pair(&transport).await;

        let result =
            read_request(&mut server, DecoderLimits::default(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ServerError::Transport(_))));
    }
}
