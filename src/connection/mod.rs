//! Connection management
//!
//! This module handles:
//! * The sans-io connection state machine and its configuration
//! * Per-request lifecycle and timers
//! * Transport encryption layered under the framing
//! * Transport abstraction (TCP vs Unix socket) and the tokio driver

mod conn;
pub mod driver;
mod request;
mod shim;
mod state;
mod timer;
mod tls;
mod transport;

pub use conn::{
    CloseCallback, ConnectCallback, Connection, ConnectionConfig, ConnectionConfigBuilder,
    EventCallback, Transmit, WriteToken, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT,
};
pub use driver::Command;
pub use request::{RequestId, RequestState, ResponseCallback};
pub use shim::{EncryptionShim, RustlsSession, SecureSession, SessionOutput, ShimEvent};
pub use state::ConnectionState;
pub use timer::{TimerId, Timers};
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
