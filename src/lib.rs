//! cql-wire: a multiplexed connection core for the Cassandra native protocol
//!
//! A single connection performs the OPTIONS → SUPPORTED → STARTUP → READY handshake,
//! multiplexes up to 128 concurrent requests over one socket using stream ids, layers
//! optional TLS underneath the framing, and times out each request independently of
//! socket events.
//!
//! The state machine in [`connection::Connection`] is synchronous and performs no I/O.
//! [`client::CqlClient`] runs it on a tokio task against a real socket.
//!
//! ```no_run
//! # async fn example() -> cql_wire::Result<()> {
//! use cql_wire::{CqlClient, ConnectionConfig, Message};
//!
//! let client = CqlClient::connect("127.0.0.1", 9042, ConnectionConfig::new()).await?;
//! let frame = client.execute(Message::query("SELECT release_version FROM system.local")).await?;
//! println!("opcode {:#04x}, {} body bytes", frame.opcode, frame.body.len());
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod protocol;
pub mod stream;

pub use client::CqlClient;
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::{Error, RequestError, Result};
pub use protocol::{Frame, Message};
