//! Connect to a node, run one query and print the raw response
//!
//! Usage: cargo run --example handshake -- [host] [port] [disable|require|verify-full]
//!
//! Set `RUST_LOG=cql_wire=debug` to see the protocol exchange.

use cql_wire::connection::SslMode;
use cql_wire::logger::Severity;
use cql_wire::{ConnectionConfig, CqlClient, Message};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    cql_wire::metrics::describe();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(9042);
    let sslmode: SslMode = args.next().map(|m| m.parse()).transpose()?.unwrap_or_default();

    let config = ConnectionConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .sslmode(sslmode)
        .log_level(Severity::Debug)
        .build();

    let client = CqlClient::connect(&host, port, config).await?;
    println!("connected to {}:{} ({})", host, port, sslmode);

    let frame = client
        .execute(Message::query("SELECT release_version FROM system.local"))
        .await?;
    println!(
        "response: opcode {}, stream {}, {} body bytes",
        cql_wire::protocol::opcode_name(frame.opcode),
        frame.stream,
        frame.body.len()
    );

    client.close().await?;
    Ok(())
}
