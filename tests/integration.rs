//! Integration tests for cql-wire
//!
//! The loopback tests run against a minimal in-process server. Tests marked
//! `#[ignore]` require a Cassandra (or Scylla) node on localhost:9042.

use cql_wire::connection::SslMode;
use cql_wire::protocol::constants::opcodes;
use cql_wire::{ConnectionConfig, CqlClient, Error, Message};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn response(stream: u8, opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x82, 0, stream, opcode];
    frame.extend_from_slice(&(body.len() as i32).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Answers the handshake and echoes every other request body back as a RESULT
async fn serve(mut socket: TcpStream) {
    loop {
        let mut header = [0u8; 8];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let len = i32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut body = vec![0u8; len];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }

        let stream = header[2];
        let reply = match header[3] {
            opcodes::OPTIONS => response(stream, opcodes::SUPPORTED, &[0, 0]),
            opcodes::STARTUP => response(stream, opcodes::READY, &[]),
            _ => response(stream, opcodes::RESULT, &body),
        };
        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn loopback_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket));
        }
    });
    port
}

#[tokio::test]
async fn test_loopback_handshake_and_queries() {
    let port = loopback_server().await;
    let client = CqlClient::connect("127.0.0.1", port, ConnectionConfig::new())
        .await
        .expect("connect");

    for i in 0..10 {
        let query = Message::query(&format!("SELECT {}", i));
        let frame = client.execute(query.clone()).await.expect("execute");
        assert_eq!(frame.opcode, opcodes::RESULT);
        assert_eq!(frame.body, query.body);
    }

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_loopback_many_concurrent_requests() {
    let port = loopback_server().await;
    let client = CqlClient::connect("127.0.0.1", port, ConnectionConfig::new())
        .await
        .expect("connect");

    let client = std::sync::Arc::new(client);
    let mut tasks = Vec::new();
    for i in 0..200 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let query = Message::query(&format!("SELECT {}", i));
            loop {
                match client.execute(query.clone()).await {
                    Ok(frame) => return frame.body == query.body,
                    // more requests than streams: back off and retry
                    Err(Error::Request(cql_wire::RequestError::NoStreamsAvailable)) => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Err(e) => panic!("request {} failed: {}", i, e),
                }
            }
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = CqlClient::connect("127.0.0.1", port, ConnectionConfig::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Startup(_)), "{:?}", err);
}

#[tokio::test]
async fn test_unix_socket_rejects_tls() {
    let config = ConnectionConfig::builder()
        .sslmode(SslMode::Require)
        .build();
    let err = CqlClient::connect_unix("/tmp/cql-wire-none.sock", config)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
#[ignore] // Requires Cassandra running
async fn test_connect_and_query() {
    let client = CqlClient::connect("localhost", 9042, ConnectionConfig::new())
        .await
        .expect("connect");

    let frame = client
        .execute(Message::query("SELECT release_version FROM system.local"))
        .await
        .expect("query");
    assert_eq!(frame.opcode, opcodes::RESULT);

    client.close().await.expect("close");
}

#[tokio::test]
#[ignore] // Requires Cassandra running
async fn test_invalid_query_is_a_server_error() {
    let client = CqlClient::connect("localhost", 9042, ConnectionConfig::new())
        .await
        .expect("connect");

    let err = client
        .execute(Message::query("SELECT * FROM no_such_keyspace.no_such_table"))
        .await
        .unwrap_err();
    match err {
        Error::Request(e) => assert!(e.server_code().is_some(), "{}", e),
        other => panic!("unexpected error {:?}", other),
    }

    client.close().await.expect("close");
}

#[tokio::test]
#[ignore] // Requires Cassandra with client encryption enabled
async fn test_tls_without_verification() {
    let config = ConnectionConfig::builder()
        .sslmode(SslMode::Require)
        .build();
    let client = CqlClient::connect("localhost", 9142, config)
        .await
        .expect("connect");

    client
        .execute(Message::query("SELECT release_version FROM system.local"))
        .await
        .expect("query");
    client.close().await.expect("close");
}
