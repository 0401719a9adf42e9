//! Scripted session against canned server replies.

#![allow(clippy::unwrap_used)]

use boxoffice_client::{Client, ClientError, EventState, Request, Response, Status, Verb};

/// Wire form of each request, paired with the reply the server would send.
fn exchange(client: &mut Client, request: &Request, reply: &[u8]) -> Response {
    let response = Response::decode(request.verb(), reply).unwrap();
    client.handle_response(request, &response);
    response
}

#[test]
fn full_session() {
    let mut client = Client::new();

    let login = client.login("123456", "pass1234").unwrap();
    assert_eq!(&login.to_bytes()[..], b"LIN 123456 pass1234\n");
    exchange(&mut client, &login, b"RLI REG\n");
    assert!(client.is_logged_in());

    let create =
        client.create("Conf", "01-01-2099", "10:00", "10", "desc.txt", &b"hello"[..]).unwrap();
    assert_eq!(
        &create.to_bytes()[..],
        b"CRE 123456 pass1234 Conf 01-01-2099 10:00 10 desc.txt 5 hello"
    );
    let created = exchange(&mut client, &create, b"RCE OK 001\n");
    let Response::Created { eid } = created else {
        unreachable!("expected an event id");
    };
    assert_eq!(eid.to_string(), "001");

    let reserve = client.reserve("001", "10").unwrap();
    assert_eq!(exchange(&mut client, &reserve, b"RRI ACC\n"), Response::status(Verb::Rid, Status::Acc));

    let reserve = client.reserve("001", "1").unwrap();
    assert_eq!(exchange(&mut client, &reserve, b"RRI REJ 0\n"), Response::Rejected { available: 0 });

    let mine = client.my_events().unwrap();
    let Response::MyEvents(events) = exchange(&mut client, &mine, b"RME OK 001 2\n") else {
        unreachable!("expected own events");
    };
    assert_eq!(events, vec![(eid, EventState::SoldOut)]);

    let logout = client.logout().unwrap();
    exchange(&mut client, &logout, b"RLO OK\n");
    assert!(matches!(client.my_events(), Err(ClientError::NotLoggedIn)));
}

#[test]
fn failed_login_keeps_client_logged_out() {
    let mut client = Client::new();
    let login = client.login("123456", "wrongpw1").unwrap();

    exchange(&mut client, &login, b"RLI NOK\n");

    assert!(!client.is_logged_in());
    assert!(client.login("123456", "pass1234").is_ok());
}
