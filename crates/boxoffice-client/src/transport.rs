//! Socket transport for the client.
//!
//! Provides [`Connection`], which sends one request to a server and waits for
//! the reply. Datagram verbs go over UDP and are resent when no reply shows
//! up in time. Stream verbs open a fresh TCP connection each: the request is
//! written, the write half is shut down and the reply is read until EOF.

use std::{net::SocketAddr, time::Duration};

use boxoffice_proto::{MAX_DATAGRAM_BYTES, Request, Response, Transport, Verb};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
};

use crate::{client::Client, error::ClientError};

/// Default time to wait for a reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of times a datagram is sent before giving up.
pub const DEFAULT_DATAGRAM_ATTEMPTS: usize = 3;

/// Handle to a boxoffice server.
#[derive(Debug, Clone)]
pub struct Connection {
    server: SocketAddr,
    timeout: Duration,
    datagram_attempts: usize,
}

impl Connection {
    /// Talk to `server` with the default timeout and retry count.
    pub fn new(server: SocketAddr) -> Self {
        Self { server, timeout: DEFAULT_TIMEOUT, datagram_attempts: DEFAULT_DATAGRAM_ATTEMPTS }
    }

    /// Parse `address` as `host:port`.
    pub fn connect(address: &str) -> Result<Self, ClientError> {
        let server = address
            .parse()
            .map_err(|e| ClientError::Transport(format!("invalid address '{address}': {e}")))?;
        Ok(Self::new(server))
    }

    /// Replace the reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the datagram send count (at least one).
    #[must_use]
    pub fn with_datagram_attempts(mut self, attempts: usize) -> Self {
        self.datagram_attempts = attempts.max(1);
        self
    }

    /// Server address.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send `request` over its transport and decode the reply.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let verb = request.verb();
        let reply = match verb.transport() {
            Transport::Datagram => self.exchange_datagram(verb, request).await?,
            Transport::Stream => self.exchange_stream(verb, request).await?,
        };
        Ok(Response::decode(verb, &reply)?)
    }

    /// Send `request` and let `client` track the outcome.
    pub async fn execute(
        &self,
        client: &mut Client,
        request: &Request,
    ) -> Result<Response, ClientError> {
        let response = self.send(request).await?;
        client.handle_response(request, &response);
        Ok(response)
    }

    async fn exchange_datagram(&self, verb: Verb, request: &Request) -> Result<Vec<u8>, ClientError> {
        let local: SocketAddr = if self.server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.server).await?;

        let bytes = request.to_bytes();
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

        for _ in 0..self.datagram_attempts {
            socket.send(&bytes).await?;
            if let Ok(received) = tokio::time::timeout(self.timeout, socket.recv(&mut buf)).await {
                let len = received?;
                buf.truncate(len);
                return Ok(buf);
            }
        }
        Err(ClientError::Timeout(verb))
    }

    async fn exchange_stream(&self, verb: Verb, request: &Request) -> Result<Vec<u8>, ClientError> {
        let exchange = async {
            let mut stream = TcpStream::connect(self.server).await?;
            stream.write_all(&request.to_bytes()).await?;
            stream.shutdown().await?;

            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await?;
            Ok::<_, ClientError>(reply)
        };

        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(verb))??;
        if reply.is_empty() {
            return Err(ClientError::Closed(verb));
        }
        Ok(reply)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_proto::{EventId, Status};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn datagram_reply_is_decoded_and_tracked() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"LIN 123456 pass1234\n");
            server.send_to(b"RLI REG\n", peer).await.unwrap();
        });

        let connection = Connection::new(addr);
        let mut client = Client::new();
        let request = client.login("123456", "pass1234").unwrap();
        let response = connection.execute(&mut client, &request).await.unwrap();

        assert_eq!(response, Response::status(Verb::Lin, Status::Reg));
        assert!(client.is_logged_in());
    }

    #[tokio::test]
    async fn lost_datagram_is_resent() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            // Ignore the first copy.
            server.recv_from(&mut buf).await.unwrap();
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(b"RLO OK\n", peer).await.unwrap();
        });

        let connection = Connection::new(addr).with_timeout(Duration::from_millis(200));
        let request = Request::Logout {
            uid: "123456".parse().unwrap(),
            password: "pass1234".parse().unwrap(),
        };

        let response = connection.send(&request).await.unwrap();
        assert_eq!(response, Response::status(Verb::Lou, Status::Ok));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let connection = Connection::new(server.local_addr().unwrap())
            .with_timeout(Duration::from_millis(50))
            .with_datagram_attempts(2);

        let result = connection.send(&Request::Show { eid: EventId::FIRST }).await;
        // SED is a stream verb; nothing listens on TCP at this port.
        assert!(result.is_err());

        let request = Request::Logout {
            uid: "123456".parse().unwrap(),
            password: "pass1234".parse().unwrap(),
        };
        let result = connection.send(&request).await;
        assert!(matches!(result, Err(ClientError::Timeout(Verb::Lou))));
    }

    #[tokio::test]
    async fn stream_reply_read_to_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            assert_eq!(request, b"LST\n");
            stream.write_all(b"RLS NOK\n").await.unwrap();
        });

        let response = Connection::new(addr).send(&Request::List).await.unwrap();
        assert_eq!(response, Response::status(Verb::Lst, Status::Nok));
    }

    #[tokio::test]
    async fn stream_closed_without_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let result = Connection::new(addr).send(&Request::List).await;
        assert!(matches!(result, Err(ClientError::Closed(Verb::Lst) | ClientError::Transport(_))));
    }
}
