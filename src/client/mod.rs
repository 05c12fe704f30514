//! High-level async client
//!
//! [`CqlClient`] runs a [`Connection`](crate::connection::Connection) on a tokio task and
//! exposes request execution as futures.

mod callback;
mod cql_client;

pub use callback::ChannelCallback;
pub use cql_client::CqlClient;
