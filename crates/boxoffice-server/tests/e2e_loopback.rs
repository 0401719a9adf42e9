//! End-to-end tests over loopback sockets.
//!
//! A real `Server` runs on an ephemeral port and `boxoffice-client` talks to
//! it over UDP and TCP, exactly as a deployed client would.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use boxoffice_client::{Client, ClientError, EventState, Response, Status, Verb, transport::Connection};
use boxoffice_server::{
    DriverConfig, MemoryStorage, Server, ServerRuntimeConfig, SystemEnv,
};
use tokio::{io::AsyncWriteExt, net::TcpStream};

async fn start(config: DriverConfig) -> Connection {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        driver: config,
        read_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let server = Server::bind(config, SystemEnv::new(), MemoryStorage::new()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    Connection::new(addr).with_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn full_session_over_both_transports() {
    let connection = start(DriverConfig::default()).await;
    let mut client = Client::new();

    let login = client.login("123456", "pass1234").unwrap();
    let reply = connection.execute(&mut client, &login).await.unwrap();
    assert_eq!(reply, Response::status(Verb::Lin, Status::Reg));

    let create =
        client.create("Conf", "01-01-2099", "10:00", "10", "desc.txt", &b"hello"[..]).unwrap();
    let Response::Created { eid } = connection.execute(&mut client, &create).await.unwrap() else {
        unreachable!("create failed");
    };

    let Response::EventList(events) = connection.send(&client.list()).await.unwrap() else {
        unreachable!("expected a listing");
    };
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name.as_str(), "Conf");
    assert_eq!(events[0].state, EventState::Active);

    let reserve = client.reserve(&eid.to_string(), "10").unwrap();
    assert_eq!(
        connection.send(&reserve).await.unwrap(),
        Response::status(Verb::Rid, Status::Acc)
    );

    let Response::EventList(events) = connection.send(&client.list()).await.unwrap() else {
        unreachable!("expected a listing");
    };
    assert_eq!(events[0].state, EventState::SoldOut);

    let reserve = client.reserve(&eid.to_string(), "1").unwrap();
    assert_eq!(
        connection.send(&reserve).await.unwrap(),
        Response::status(Verb::Rid, Status::Sld)
    );

    let show = client.show(&eid.to_string()).unwrap();
    let Response::EventDetails(details) = connection.send(&show).await.unwrap() else {
        unreachable!("expected details");
    };
    assert_eq!(&details.description[..], b"hello");
    assert_eq!(details.reserved, 10);

    let logout = client.logout().unwrap();
    connection.execute(&mut client, &logout).await.unwrap();
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn large_description_round_trips() {
    let connection = start(DriverConfig::default()).await;
    let mut client = Client::new();
    let login = client.login("654321", "pass1234").unwrap();
    connection.execute(&mut client, &login).await.unwrap();

    let description: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let create = client
        .create("Big", "01-01-2099", "10:00", "500", "big.bin", description.clone())
        .unwrap();
    let Response::Created { eid } = connection.send(&create).await.unwrap() else {
        unreachable!("create failed");
    };

    let show = client.show(&eid.to_string()).unwrap();
    let Response::EventDetails(details) = connection.send(&show).await.unwrap() else {
        unreachable!("expected details");
    };
    assert_eq!(&details.description[..], &description[..]);
}

#[tokio::test]
async fn full_connection_table_rejects_without_reply() {
    let connection = start(DriverConfig { max_connections: 1, ..Default::default() }).await;

    // Occupies the only slot without sending a request.
    let mut holder = TcpStream::connect(connection.server()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = connection.send(&Client::new().list()).await;
    assert!(matches!(result, Err(ClientError::Closed(Verb::Lst) | ClientError::Transport(_))));

    // Datagrams are unaffected by the table.
    let client = Client::new();
    let login = client.login("111111", "pass1234").unwrap();
    assert_eq!(
        connection.send(&login).await.unwrap(),
        Response::status(Verb::Lin, Status::Reg)
    );

    holder.shutdown().await.unwrap();
    drop(holder);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        connection.send(&Client::new().list()).await.unwrap(),
        Response::status(Verb::Lst, Status::Nok)
    );
}

#[tokio::test]
async fn wrong_transport_gets_err() {
    let connection = start(DriverConfig::default()).await;
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(connection.server()).await.unwrap();

    socket.send(b"LST\n").await.unwrap();
    let mut buf = [0u8; 64];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(&buf[..len], b"ERR\n");
}
