//! CqlClient implementation

use super::callback::ChannelCallback;
use crate::connection::driver::{self, Command};
use crate::connection::{Connection, ConnectionConfig, EncryptionShim, RustlsSession, Transport};
use crate::logger::Logger;
use crate::protocol::{Frame, Message};
use crate::{Error, Result};
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Async client for one CQL connection
///
/// Requests are multiplexed over the connection; any number of `execute` calls may be
/// awaited concurrently.
pub struct CqlClient {
    commands: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    owned_logger: Option<Logger>,
}

impl CqlClient {
    /// Connect over TCP and complete the startup handshake
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example() -> cql_wire::Result<()> {
    /// use cql_wire::{CqlClient, ConnectionConfig};
    /// use cql_wire::connection::SslMode;
    ///
    /// let config = ConnectionConfig::builder()
    ///     .sslmode(SslMode::VerifyFull)
    ///     .build();
    /// let client = CqlClient::connect("cassandra.example.com", 9042, config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(host: &str, port: u16, config: ConnectionConfig) -> Result<Self> {
        let target = host.to_string();
        let connect = async move {
            Transport::connect_tcp(&target, port)
                .await
                .map_err(into_io_error)
        };
        Self::start(format!("{}:{}", host, port), host, connect, config).await
    }

    /// Connect over a Unix domain socket
    pub async fn connect_unix(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<Self> {
        if config.sslmode.is_enabled() {
            return Err(Error::Config(
                "TLS is only supported for TCP connections".into(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();
        let connect = async move { Transport::connect_unix(&path).await.map_err(into_io_error) };
        Self::start(label.clone(), &label, connect, config).await
    }

    /// Run the connection over an already established byte stream
    ///
    /// `label` names the peer in logs and is the TLS server name when encryption is
    /// enabled.
    pub async fn with_stream<S>(stream: S, label: &str, config: ConnectionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connect = async move { Ok::<_, io::Error>(stream) };
        Self::start(label.to_string(), label, connect, config).await
    }

    async fn start<S, F>(
        label: String,
        server_name: &str,
        connect: F,
        config: ConnectionConfig,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: Future<Output = io::Result<S>> + Send + 'static,
    {
        let (logger, owned_logger) = match &config.logger {
            Some(logger) => (logger.clone(), None),
            None => {
                let logger = Logger::tracing(config.log_level)?;
                (logger.clone(), Some(logger))
            }
        };

        let mut conn = match Self::build_connection(&label, server_name, &config, logger) {
            Ok(conn) => conn,
            Err(e) => {
                shutdown_logger(owned_logger).await;
                return Err(e);
            }
        };

        let (connect_tx, connect_rx) = oneshot::channel();
        conn.on_connect(move |result| {
            let _ = connect_tx.send(result);
        });
        let closed = Arc::new(AtomicBool::new(false));
        let on_close = closed.clone();
        conn.on_close(move || on_close.store(true, Ordering::Release));

        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            driver::run(conn, connect, command_rx)
                .instrument(tracing::info_span!("cql_connection", host = %label)),
        );

        let mut client = Self {
            commands,
            closed,
            task: Some(task),
            owned_logger,
        };

        match connect_rx.await {
            Ok(Ok(())) => {
                tracing::info!(host = %label, "connected");
                Ok(client)
            }
            Ok(Err(e)) => {
                client.finish().await;
                Err(e)
            }
            Err(_) => {
                client.finish().await;
                Err(Error::ConnectionClosed)
            }
        }
    }

    fn build_connection(
        label: &str,
        server_name: &str,
        config: &ConnectionConfig,
        logger: Logger,
    ) -> Result<Connection> {
        let conn = Connection::new(label, config, logger);
        match config.tls_config()? {
            Some(tls) => {
                let session = RustlsSession::new(&tls, server_name)?;
                Ok(conn.with_encryption(EncryptionShim::new(Box::new(session))))
            }
            None => Ok(conn),
        }
    }

    /// Send a request and wait for its response
    ///
    /// A server ERROR frame is returned as
    /// [`RequestError::Server`](crate::RequestError::Server).
    pub async fn execute(&self, message: Message) -> Result<Frame> {
        let (callback, response) = ChannelCallback::new(message);
        self.commands
            .send(Command::Execute(Box::new(callback)))
            .map_err(|_| Error::ConnectionClosed)?;

        match response.await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Whether the socket has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close once outstanding requests resolve, and wait for the socket to close
    pub async fn close(mut self) -> Result<()> {
        let _ = self.commands.send(Command::Close);
        self.finish().await;
        Ok(())
    }

    async fn finish(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "connection task failed");
            }
        }
        shutdown_logger(self.owned_logger.take()).await;
    }
}

impl Drop for CqlClient {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Command::Close);
        }
    }
}

impl std::fmt::Debug for CqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlClient")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn shutdown_logger(logger: Option<Logger>) {
    if let Some(logger) = logger {
        // joins the log thread
        if let Err(e) = tokio::task::spawn_blocking(move || logger.shutdown()).await {
            tracing::error!(error = %e, "logger shutdown failed");
        }
    }
}

fn into_io_error(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}
