//! Tokio driver for [`Connection`]
//!
//! One task per connection runs the event loop: it races socket reads, write
//! completions, the next timer deadline and application commands, and feeds each into
//! the state machine. Writes go through a separate task so a slow socket never holds up
//! reads or timers.

use super::conn::{Connection, Transmit, WriteToken};
use super::request::ResponseCallback;
use crate::error::RequestError;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Application command for a running connection
pub enum Command {
    /// Issue a request
    Execute(Box<dyn ResponseCallback>),
    /// Close once outstanding requests resolve
    Close,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Execute(callback) => f
                .debug_tuple("Execute")
                .field(&crate::protocol::opcode_name(callback.request().opcode))
                .finish(),
            Command::Close => write!(f, "Close"),
        }
    }
}

/// Drive `conn` until its socket is closed
///
/// `connect` opens the socket; it races the connect timeout. Commands still queued
/// when the connection closes are rejected through their callbacks.
pub async fn run<S, F>(
    mut conn: Connection,
    connect: F,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: Future<Output = io::Result<S>>,
{
    if let Err(e) = conn.connect(now()) {
        tracing::error!(error = %e, "connection cannot be started");
    } else if let Some(stream) = establish(&mut conn, connect, &mut commands).await {
        event_loop(&mut conn, stream, &mut commands).await;
    }

    reject_queued(&conn, &mut commands);
    conn.handle_socket_closed();
    tracing::debug!("connection task finished");
}

/// Wait for the socket, honouring the connect timeout and early close
async fn establish<S, F>(
    conn: &mut Connection,
    connect: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<S>
where
    F: Future<Output = io::Result<S>>,
{
    tokio::pin!(connect);
    let mut commands_open = true;

    loop {
        if conn.wants_close() {
            return None;
        }
        let deadline = conn.next_timeout();

        tokio::select! {
            result = &mut connect => {
                return match result {
                    Ok(stream) => {
                        conn.handle_connect(Ok(()), now());
                        Some(stream)
                    }
                    Err(e) => {
                        conn.handle_connect(Err(e), now());
                        None
                    }
                };
            }
            command = commands.recv(), if commands_open => {
                commands_open = apply(conn, command);
            }
            _ = sleep_until(deadline) => conn.handle_timeout(now()),
        }
    }
}

async fn event_loop<S>(
    conn: &mut Connection,
    stream: S,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (write_tx, write_rx) = mpsc::unbounded_channel::<Transmit>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(WriteToken, io::Result<()>)>();
    let writer = tokio::spawn(write_loop(writer, write_rx, done_tx));

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut commands_open = true;

    loop {
        while let Some(transmit) = conn.poll_transmit() {
            if let Err(mpsc::error::SendError(transmit)) = write_tx.send(transmit) {
                conn.handle_write(
                    transmit.token,
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped")),
                    now(),
                );
            }
        }
        if conn.wants_close() {
            break;
        }
        let deadline = conn.next_timeout();

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => conn.handle_read_closed(None, now()),
                Ok(n) => {
                    tracing::trace!(bytes = n, "read");
                    conn.handle_read(&buf, now());
                    buf.clear();
                }
                Err(e) => conn.handle_read_closed(Some(e), now()),
            },
            Some((token, result)) = done_rx.recv() => conn.handle_write(token, result, now()),
            command = commands.recv(), if commands_open => {
                commands_open = apply(conn, command);
            }
            _ = sleep_until(deadline) => conn.handle_timeout(now()),
        }
    }

    writer.abort();
}

/// Fail requests that arrived after the connection stopped taking commands
fn reject_queued(conn: &Connection, commands: &mut mpsc::UnboundedReceiver<Command>) {
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Execute(callback) = command {
            let error = if conn.is_defunct() {
                RequestError::Defunct
            } else {
                RequestError::ConnectionClosed
            };
            callback.on_error(error);
        }
    }
}

/// Returns `false` once the command channel has closed
fn apply(conn: &mut Connection, command: Option<Command>) -> bool {
    match command {
        Some(Command::Execute(callback)) => {
            if let Err(e) = conn.execute(callback, now()) {
                tracing::debug!(error = %e, "request rejected");
            }
            true
        }
        Some(Command::Close) => {
            conn.close();
            true
        }
        None => {
            // every client handle is gone
            conn.close();
            false
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut transmits: mpsc::UnboundedReceiver<Transmit>,
    done: mpsc::UnboundedSender<(WriteToken, io::Result<()>)>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(transmit) = transmits.recv().await {
        let result = match writer.write_all(&transmit.data).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if done.send((transmit.token, result)).is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Current time on the tokio clock, so paused-time tests drive the timers
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
