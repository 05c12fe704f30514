//! Core connection type
//!
//! [`Connection`] is a synchronous state machine with no I/O of its own. The driver
//! feeds it the four kinds of events (socket connect and reads, write completions,
//! timer expiry, application requests), each stamped with the current `Instant`, and
//! collects the bytes it wants written through [`Connection::poll_transmit`].

use super::request::{Handler, Request, RequestId, ResponseCallback, TimerOwner};
use super::shim::{EncryptionShim, ShimEvent};
use super::state::ConnectionState;
use super::timer::{TimerId, Timers};
use super::tls::{SslMode, TlsConfig};
use crate::error::RequestError;
use crate::logger::{Logger, Severity};
use crate::metrics::{counters, histograms, labels};
use crate::protocol::constants::{opcodes, DEFAULT_CQL_VERSION};
use crate::protocol::{
    decode_error_response, decode_supported, encode_request, opcode_name, Frame,
    FrameAssembler, Message, SupportedOptions,
};
use crate::stream::StreamManager;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::time::{Duration, Instant};

/// Default time allowed for the socket connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default time allowed for a request to be written
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default time allowed for a response once the request is written
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(12);

/// Connection configuration
///
/// Use `ConnectionConfig::builder()` for a fluent API.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Socket connect timeout (default: 5 seconds)
    pub connect_timeout: Duration,
    /// Per-request write timeout (default: 1 second)
    pub write_timeout: Duration,
    /// Per-request read timeout (default: 12 seconds)
    pub read_timeout: Duration,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// TLS settings; when `None` the defaults for `sslmode` are used
    pub tls: Option<TlsConfig>,
    /// CQL version sent in STARTUP
    pub cql_version: String,
    /// Level for the logger the client creates when `logger` is `None`
    pub log_level: Severity,
    /// Shared logger
    pub logger: Option<Logger>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            sslmode: SslMode::default(),
            tls: None,
            cql_version: DEFAULT_CQL_VERSION.to_string(),
            log_level: Severity::default(),
            logger: None,
        }
    }
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use cql_wire::ConnectionConfig;
    /// use std::time::Duration;
    ///
    /// let config = ConnectionConfig::builder()
    ///     .connect_timeout(Duration::from_secs(10))
    ///     .read_timeout(Duration::from_secs(30))
    ///     .build();
    /// assert_eq!(config.read_timeout, Duration::from_secs(30));
    /// ```
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self::default(),
        }
    }

    /// TLS settings to use, or `None` for a plaintext connection
    pub fn tls_config(&self) -> Result<Option<TlsConfig>> {
        if !self.sslmode.is_enabled() {
            return Ok(None);
        }
        match &self.tls {
            Some(tls) => Ok(Some(tls.clone())),
            None => TlsConfig::for_mode(self.sslmode),
        }
    }
}

/// Builder for creating `ConnectionConfig`
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the socket connect timeout
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Set the per-request write timeout
    pub fn write_timeout(mut self, duration: Duration) -> Self {
        self.config.write_timeout = duration;
        self
    }

    /// Set the per-request read timeout
    pub fn read_timeout(mut self, duration: Duration) -> Self {
        self.config.read_timeout = duration;
        self
    }

    /// Set SSL/TLS mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.config.sslmode = mode;
        self
    }

    /// Set TLS settings
    ///
    /// Only used when `sslmode` enables encryption.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Set the CQL version sent in STARTUP
    pub fn cql_version(mut self, version: impl Into<String>) -> Self {
        self.config.cql_version = version.into();
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: Severity) -> Self {
        self.config.log_level = level;
        self
    }

    /// Share an existing logger
    pub fn logger(mut self, logger: Logger) -> Self {
        self.config.logger = Some(logger);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Fired once: on READY, or with the reason the connection never got there
pub type ConnectCallback = Box<dyn FnOnce(Result<()>) + Send>;
/// Fired once when the socket has been closed
pub type CloseCallback = Box<dyn FnOnce() + Send>;
/// Receives server pushed frames (negative stream id)
pub type EventCallback = Box<dyn FnMut(Frame) + Send>;

/// Identifies the write a completion belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteToken {
    /// Frame for the request holding `stream`
    Request {
        /// Stream id
        stream: i8,
        /// Request that held the stream when the write was queued
        id: RequestId,
    },
    /// TLS session bytes
    Session,
}

/// Bytes the connection wants written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Passed back through [`Connection::handle_write`]
    pub token: WriteToken,
    /// Bytes to write, already encrypted when TLS is active
    pub data: Bytes,
}

/// CQL connection state machine
pub struct Connection {
    host: String,
    state: ConnectionState,
    defunct: bool,
    close_requested: bool,
    connect_timeout: Duration,
    write_timeout: Duration,
    read_timeout: Duration,
    cql_version: String,
    logger: Logger,
    streams: StreamManager<Request>,
    timers: Timers<TimerOwner>,
    timed_out: HashSet<i8>,
    request_count: usize,
    next_request_id: u64,
    connect_timer: Option<TimerId>,
    connected_at: Option<Instant>,
    assembler: FrameAssembler,
    shim: Option<EncryptionShim>,
    transmits: VecDeque<Transmit>,
    supported: Option<SupportedOptions>,
    connect_callback: Option<ConnectCallback>,
    close_callback: Option<CloseCallback>,
    event_callback: Option<EventCallback>,
}

impl Connection {
    /// Create a connection to `host` (used in logs and for nothing else)
    pub fn new(host: impl Into<String>, config: &ConnectionConfig, logger: Logger) -> Self {
        Self {
            host: host.into(),
            state: ConnectionState::New,
            defunct: false,
            close_requested: false,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            read_timeout: config.read_timeout,
            cql_version: config.cql_version.clone(),
            logger,
            streams: StreamManager::new(),
            timers: Timers::new(),
            timed_out: HashSet::new(),
            request_count: 0,
            next_request_id: 0,
            connect_timer: None,
            connected_at: None,
            assembler: FrameAssembler::new(),
            shim: None,
            transmits: VecDeque::new(),
            supported: None,
            connect_callback: None,
            close_callback: None,
            event_callback: None,
        }
    }

    /// Run the transport through an encryption shim
    pub fn with_encryption(mut self, shim: EncryptionShim) -> Self {
        self.shim = Some(shim);
        self
    }

    /// Set the connect callback
    pub fn on_connect(&mut self, callback: impl FnOnce(Result<()>) + Send + 'static) {
        self.connect_callback = Some(Box::new(callback));
    }

    /// Set the close callback
    pub fn on_close(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.close_callback = Some(Box::new(callback));
    }

    /// Set the server event callback
    pub fn on_event(&mut self, callback: impl FnMut(Frame) + Send + 'static) {
        self.event_callback = Some(Box::new(callback));
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Host label
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether a fatal error occurred
    pub fn is_defunct(&self) -> bool {
        self.defunct
    }

    /// Whether requests can be executed
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready && !self.defunct
    }

    /// Whether the connection is closing or closed
    pub fn is_closing(&self) -> bool {
        self.state.is_closing()
    }

    /// Requests awaiting resolution, not counting those that already timed out
    pub fn outstanding_request_count(&self) -> usize {
        self.request_count - self.timed_out.len()
    }

    /// Requests that timed out and still hold their stream id
    pub fn timed_out_request_count(&self) -> usize {
        self.timed_out.len()
    }

    /// Free stream ids
    pub fn available_streams(&self) -> usize {
        self.streams.available_streams()
    }

    /// Options the server listed in SUPPORTED
    pub fn supported(&self) -> Option<&SupportedOptions> {
        self.supported.as_ref()
    }

    /// Start connecting: arms the connect timeout
    ///
    /// The driver reports the socket outcome through [`handle_connect`](Self::handle_connect).
    pub fn connect(&mut self, now: Instant) -> Result<()> {
        if self.state != ConnectionState::New || self.connect_timer.is_some() {
            return Err(Error::InvalidState {
                expected: ConnectionState::New.to_string(),
                actual: self.state.to_string(),
            });
        }
        self.logger
            .debug(format_args!("Connecting to '{}'", self.host));
        self.connect_timer = Some(self.timers.start(
            now,
            self.connect_timeout,
            TimerOwner::Connect,
        ));
        Ok(())
    }

    /// Socket connect finished
    pub fn handle_connect(&mut self, result: io::Result<()>, now: Instant) {
        if self.defunct {
            // already timed out
            return;
        }
        self.stop_connect_timer();

        match result {
            Ok(()) => {
                if let Err(e) = self.state.transition(ConnectionState::Connected) {
                    self.logger.warn(format_args!(
                        "Ignoring connect on '{}': {}",
                        self.host, e
                    ));
                    return;
                }
                self.logger
                    .debug(format_args!("Connected to '{}'", self.host));
                self.connected_at = Some(now);
                self.event_received(now);
            }
            Err(e) => {
                self.notify_error(format!("Unable to connect: {}", e));
                self.defunct_with(labels::REASON_CONNECT);
            }
        }
    }

    /// Bytes read from the socket
    pub fn handle_read(&mut self, data: &[u8], now: Instant) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.shim.is_some() {
            self.feed_shim(data, now);
        } else {
            self.consume(data, now);
        }
        // frames may have moved the handshake forward
        self.poll_handshake(now);
    }

    /// The read side ended: `None` on EOF, `Some` on error
    ///
    /// The socket is closed right away; requests still in flight are failed when the
    /// driver reports the close.
    pub fn handle_read_closed(&mut self, error: Option<io::Error>, _now: Instant) {
        match error {
            Some(e) => self
                .logger
                .info(format_args!("Read error '{}' on '{}'", e, self.host)),
            None => self
                .logger
                .debug(format_args!("Connection to '{}' closed by peer", self.host)),
        }
        self.hard_close(labels::REASON_READ);
    }

    /// A write queued through [`poll_transmit`](Self::poll_transmit) completed
    pub fn handle_write(&mut self, token: WriteToken, result: io::Result<()>, now: Instant) {
        let (stream, id) = match token {
            WriteToken::Session => {
                if let Err(e) = result {
                    self.logger
                        .info(format_args!("TLS write error '{}' on '{}'", e, self.host));
                    self.defunct_with(labels::REASON_WRITE);
                }
                return;
            }
            WriteToken::Request { stream, id } => (stream, id),
        };

        let timed_out = match self.streams.get(stream) {
            Some(request) if request.id == id => request.is_timed_out(),
            _ => {
                // resolved before the write came back
                self.logger.trace(format_args!(
                    "Stale write completion for stream {} on '{}'",
                    stream, self.host
                ));
                return;
            }
        };

        match result {
            Ok(()) if timed_out => {}
            Ok(()) => {
                if let Some(request) = self.streams.get_mut(stream) {
                    request.start_read(&mut self.timers, now, self.read_timeout);
                }
            }
            Err(e) => {
                self.logger
                    .info(format_args!("Write error '{}' on '{}'", e, self.host));
                self.defunct_with(labels::REASON_WRITE);
                if let Some(handler) = self.release_request(stream) {
                    counters::request_completed(labels::OUTCOME_ERROR);
                    self.fail_handler(handler, RequestError::Write(e.to_string()));
                }
                self.maybe_close();
            }
        }
    }

    /// Earliest pending timer deadline
    pub fn next_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        while let Some((timer, owner)) = self.timers.poll_expired(now) {
            match owner {
                TimerOwner::Connect => {
                    if self.connect_timer == Some(timer) {
                        self.connect_timer = None;
                        self.notify_error("Connection timeout");
                        self.defunct_with(labels::REASON_CONNECT);
                    }
                }
                TimerOwner::Request { stream, id } => self.on_request_timeout(stream, id, timer),
            }
        }
    }

    /// Issue an application request
    ///
    /// A rejected request has its callback resolved with `on_error` and the matching
    /// error returned, so the caller can apply backpressure.
    pub fn execute(&mut self, callback: Box<dyn ResponseCallback>, now: Instant) -> Result<()> {
        if self.defunct {
            callback.on_error(RequestError::Defunct);
            return Err(Error::Defunct);
        }
        if self.state != ConnectionState::Ready {
            callback.on_error(RequestError::NotReady);
            return Err(Error::NotReady(self.state.to_string()));
        }

        match self.submit(Handler::Callback(callback), now) {
            Ok(()) => Ok(()),
            Err((handler, error)) => {
                counters::request_completed(labels::OUTCOME_ERROR);
                let returned = match &error {
                    RequestError::NoStreamsAvailable => {
                        Error::ConnectionBusy("no streams available".into())
                    }
                    other => Error::Request(other.clone()),
                };
                if let Some(handler) = handler {
                    self.fail_handler(handler, error);
                }
                Err(returned)
            }
        }
    }

    /// Begin a graceful close
    ///
    /// The socket is closed once no request is outstanding.
    pub fn close(&mut self) {
        if self.state.is_closing() {
            return;
        }
        if self.state.transition(ConnectionState::Closing).is_ok() {
            self.logger
                .debug(format_args!("Closing connection to '{}'", self.host));
        }
        self.maybe_close();
    }

    /// Mark the connection as failed and begin closing it
    ///
    /// Idempotent. Requests not yet handed to the socket are failed; requests already
    /// written may still complete or time out.
    pub fn defunct(&mut self) {
        self.defunct_with(labels::REASON_PROTOCOL);
    }

    /// Next bytes to write
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        if self.defunct {
            return None;
        }
        self.transmits.pop_front()
    }

    /// Whether the driver should close the socket
    pub fn wants_close(&self) -> bool {
        self.close_requested
    }

    /// The driver closed the socket
    ///
    /// Every request still holding a stream is released: live ones fail with
    /// [`RequestError::ConnectionClosed`], timed out ones are dropped. The close
    /// callback fires once.
    pub fn handle_socket_closed(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if !self.state.is_closing() {
            let _ = self.state.transition(ConnectionState::Closing);
        }
        let _ = self.state.transition(ConnectionState::Closed);
        self.close_requested = true;

        self.timers.clear();
        self.connect_timer = None;
        self.transmits.clear();

        for stream in self.streams.streams_in_use() {
            if let Some(Handler::Callback(callback)) = self.release_request(stream) {
                counters::request_completed(labels::OUTCOME_CLOSED);
                callback.on_error(RequestError::ConnectionClosed);
            }
        }
        self.timed_out.clear();
        self.request_count = 0;

        if let Some(callback) = self.connect_callback.take() {
            callback(Err(Error::ConnectionClosed));
        }

        counters::connection_closed();
        self.logger
            .debug(format_args!("Connection to '{}' closed", self.host));

        if let Some(callback) = self.close_callback.take() {
            callback();
        }
    }

    fn event_received(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connected => self.start_transport(now),
            ConnectionState::Handshake => self.send_startup_step(Message::options(), now),
            ConnectionState::Supported => {
                let startup = Message::startup(&self.cql_version);
                self.send_startup_step(startup, now);
            }
            ConnectionState::Ready => self.notify_ready(now),
            _ => {}
        }
    }

    fn start_transport(&mut self, now: Instant) {
        if self.shim.is_some() {
            // an empty read produces the first handshake flight
            self.feed_shim(&[], now);
            self.poll_handshake(now);
        } else {
            self.advance(ConnectionState::Handshake, now);
        }
    }

    fn poll_handshake(&mut self, now: Instant) {
        let done = self.shim.as_ref().map_or(false, EncryptionShim::is_handshake_done);
        if done && self.state == ConnectionState::Connected && !self.defunct {
            self.logger
                .debug(format_args!("TLS handshake complete on '{}'", self.host));
            self.advance(ConnectionState::Handshake, now);
        }
    }

    fn send_startup_step(&mut self, message: Message, now: Instant) {
        if let Err((handler, error)) = self.submit(Handler::Startup(message), now) {
            if let Some(handler) = handler {
                self.fail_handler(handler, error);
            }
        }
    }

    /// Assign a stream, encode and queue the request
    ///
    /// On failure the request is released again and its handler handed back unresolved.
    fn submit(
        &mut self,
        handler: Handler,
        now: Instant,
    ) -> std::result::Result<(), (Option<Handler>, RequestError)> {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;

        let stream = match self.streams.acquire(Request::new(id, handler)) {
            Ok(stream) => stream,
            Err(request) => return Err((request.into_handler(), RequestError::NoStreamsAvailable)),
        };

        let encoded = match self.streams.get_mut(stream) {
            Some(request) => {
                request.stream = Some(stream);
                match request.message() {
                    Some(message) => encode_request(stream, message)
                        .map(|frame| (message.opcode, frame.freeze()))
                        .map_err(|e| RequestError::Prepare(e.to_string())),
                    None => Err(RequestError::Prepare("request already resolved".into())),
                }
            }
            None => Err(RequestError::Prepare(format!("stream {} not held", stream))),
        };

        let (opcode, frame) = match encoded {
            Ok(encoded) => encoded,
            Err(error) => {
                let handler = self.streams.release(stream).and_then(Request::into_handler);
                return Err((handler, error));
            }
        };

        let data = match self.shim.as_mut() {
            Some(shim) => match shim.encrypt(&frame) {
                Ok(data) => data,
                Err(e) => {
                    let handler = self.streams.release(stream).and_then(Request::into_handler);
                    self.logger
                        .error(format_args!("Encryption failed on '{}': {}", self.host, e));
                    self.hard_close(labels::REASON_TLS);
                    return Err((handler, RequestError::Write(e.to_string())));
                }
            },
            None => frame,
        };

        self.logger.debug(format_args!(
            "Sending message type {} with stream {}, size {} on '{}'",
            opcode_name(opcode),
            stream,
            data.len(),
            self.host
        ));

        if let Some(request) = self.streams.get_mut(stream) {
            request.start_write(&mut self.timers, now, self.write_timeout);
        }
        self.request_count += 1;
        counters::request_issued();
        self.transmits.push_back(Transmit {
            token: WriteToken::Request { stream, id },
            data,
        });
        Ok(())
    }

    fn feed_shim(&mut self, data: &[u8], now: Instant) {
        let events = match self.shim.as_mut() {
            Some(shim) => shim.on_read(data),
            None => return,
        };

        let events = match events {
            Ok(events) => events,
            Err(e) => {
                self.logger
                    .error(format_args!("TLS error on '{}': {}", self.host, e));
                if self.state == ConnectionState::Connected {
                    self.notify_error(format!("TLS handshake failed: {}", e));
                }
                self.hard_close(labels::REASON_TLS);
                return;
            }
        };

        for event in events {
            match event {
                ShimEvent::Write(data) => self.transmits.push_back(Transmit {
                    token: WriteToken::Session,
                    data,
                }),
                ShimEvent::HandshakeComplete => self.poll_handshake(now),
                ShimEvent::Plaintext(data) => self.consume(&data, now),
            }
        }
    }

    /// Run bytes through the frame assembler and dispatch complete frames
    fn consume(&mut self, data: &[u8], now: Instant) {
        let mut input = data;
        while !input.is_empty() {
            let consumed = match self.assembler.consume(input) {
                Ok(consumed) => consumed,
                Err(e) => {
                    self.logger.error(format_args!(
                        "Error consuming message on '{}': {}",
                        self.host, e
                    ));
                    counters::frame_error();
                    self.assembler.reset();
                    return;
                }
            };
            input = &input[consumed..];

            if let Some(frame) = self.assembler.take_frame() {
                self.logger.debug(format_args!(
                    "Consumed message type {} with stream {}, size {} on '{}'",
                    opcode_name(frame.opcode),
                    frame.stream,
                    frame.body.len(),
                    self.host
                ));
                self.dispatch_frame(frame, now);
            }
        }
    }

    fn dispatch_frame(&mut self, frame: Frame, now: Instant) {
        if frame.is_event() {
            match self.event_callback.as_mut() {
                Some(callback) => callback(frame),
                None => self.logger.debug(format_args!(
                    "Ignoring {} frame on stream {} from '{}'",
                    opcode_name(frame.opcode),
                    frame.stream,
                    self.host
                )),
            }
            return;
        }

        if self.streams.get(frame.stream).is_none() {
            self.logger.error(format_args!(
                "Invalid stream {} returned from server on '{}'",
                frame.stream, self.host
            ));
            self.defunct_with(labels::REASON_PROTOCOL);
            return;
        }

        match self.release_request(frame.stream) {
            None => {
                counters::late_response();
                self.logger.debug(format_args!(
                    "Late response on stream {} from '{}' discarded",
                    frame.stream, self.host
                ));
            }
            Some(Handler::Startup(_)) => self.on_startup_response(frame, now),
            Some(Handler::Callback(callback)) => {
                if frame.opcode == opcodes::ERROR {
                    counters::request_completed(labels::OUTCOME_SERVER_ERROR);
                    callback.on_error(server_error(&frame));
                } else {
                    counters::request_completed(labels::OUTCOME_SUCCESS);
                    callback.on_success(frame);
                }
            }
        }
        self.maybe_close();
    }

    fn on_startup_response(&mut self, frame: Frame, now: Instant) {
        if self.state.is_closing() {
            self.notify_error("Connection closed during startup");
            return;
        }

        match frame.opcode {
            opcodes::SUPPORTED => {
                match decode_supported(&frame.body) {
                    Ok(options) => {
                        self.logger.debug(format_args!(
                            "Supported options from '{}': {:?}",
                            self.host, options
                        ));
                        self.supported = Some(options);
                    }
                    Err(e) => self.logger.warn(format_args!(
                        "Unable to decode SUPPORTED from '{}': {}",
                        self.host, e
                    )),
                }
                self.advance(ConnectionState::Supported, now);
            }
            opcodes::READY => self.advance(ConnectionState::Ready, now),
            opcodes::ERROR => {
                let message = match decode_error_response(&frame.body) {
                    Ok(error) => error.to_string(),
                    Err(e) => format!("malformed error response: {}", e),
                };
                self.notify_error(format!("Error during startup: {}", message));
                self.defunct_with(labels::REASON_STARTUP);
            }
            other => {
                self.notify_error(format!(
                    "Invalid opcode during startup: {}",
                    opcode_name(other)
                ));
                self.defunct_with(labels::REASON_STARTUP);
            }
        }
    }

    fn advance(&mut self, next: ConnectionState, now: Instant) {
        match self.state.transition(next) {
            Ok(()) => self.event_received(now),
            Err(e) => {
                self.notify_error(format!("Unexpected response during startup: {}", e));
                self.defunct_with(labels::REASON_STARTUP);
            }
        }
    }

    fn on_request_timeout(&mut self, stream: i8, id: RequestId, timer: TimerId) {
        let handler = match self.streams.get_mut(stream) {
            Some(request) if request.id == id => request.time_out(timer),
            _ => None,
        };
        let Some(handler) = handler else {
            return;
        };

        self.timed_out.insert(stream);
        counters::request_completed(labels::OUTCOME_TIMEOUT);
        self.logger
            .info(format_args!("Request timed out to '{}'", self.host));

        match handler {
            Handler::Callback(callback) => callback.on_timeout(),
            Handler::Startup(_) => {
                self.notify_error("Timed out during startup");
                self.defunct_with(labels::REASON_STARTUP);
            }
        }
        self.maybe_close();
    }

    /// Free `stream` and hand back its unresolved handler
    ///
    /// Returns `None` for a request that had already timed out.
    fn release_request(&mut self, stream: i8) -> Option<Handler> {
        let mut request = self.streams.release(stream)?;
        if request.is_timed_out() {
            self.timed_out.remove(&stream);
        }
        self.request_count = self.request_count.saturating_sub(1);
        request.finish(&mut self.timers)
    }

    fn fail_handler(&mut self, handler: Handler, error: RequestError) {
        match handler {
            Handler::Callback(callback) => callback.on_error(error),
            Handler::Startup(_) => {
                self.notify_error(format!("Error during startup: {}", error));
                self.defunct_with(labels::REASON_STARTUP);
            }
        }
    }

    fn defunct_with(&mut self, reason: &'static str) {
        if self.defunct {
            return;
        }
        self.defunct = true;
        counters::connection_defunct(reason);
        self.logger.warn(format_args!(
            "Defunct connection to '{}' ({})",
            self.host, reason
        ));
        self.stop_connect_timer();

        // nothing queued reaches the socket any more
        while let Some(transmit) = self.transmits.pop_front() {
            if let WriteToken::Request { stream, id } = transmit.token {
                let holds = matches!(self.streams.get(stream), Some(r) if r.id == id);
                if !holds {
                    continue;
                }
                if let Some(handler) = self.release_request(stream) {
                    counters::request_completed(labels::OUTCOME_ERROR);
                    self.fail_handler(handler, RequestError::Defunct);
                }
            }
        }

        self.close();
    }

    fn hard_close(&mut self, reason: &'static str) {
        self.defunct_with(reason);
        if !self.close_requested {
            self.close_requested = true;
            self.logger
                .debug(format_args!("Closing socket to '{}'", self.host));
        }
    }

    fn maybe_close(&mut self) {
        if self.state == ConnectionState::Closing
            && self.outstanding_request_count() == 0
            && !self.close_requested
        {
            self.close_requested = true;
            self.logger
                .debug(format_args!("Closing socket to '{}'", self.host));
        }
    }

    fn stop_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            self.timers.stop(timer);
        }
    }

    fn notify_ready(&mut self, now: Instant) {
        self.logger
            .info(format_args!("Connection to '{}' ready", self.host));
        if let Some(connected_at) = self.connected_at {
            histograms::handshake_duration(now.saturating_duration_since(connected_at));
        }
        if let Some(callback) = self.connect_callback.take() {
            callback(Ok(()));
        }
    }

    fn notify_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.logger.error(format_args!(
            "'{}' error on startup for '{}'",
            error, self.host
        ));
        if let Some(callback) = self.connect_callback.take() {
            callback(Err(Error::Startup(error)));
        }
    }
}

fn server_error(frame: &Frame) -> RequestError {
    match decode_error_response(&frame.body) {
        Ok(error) => RequestError::Server {
            code: error.code,
            message: error.message,
        },
        Err(e) => RequestError::Server {
            code: 0,
            message: format!("malformed error response: {}", e),
        },
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("state", &self.state)
            .field("defunct", &self.defunct)
            .field("close_requested", &self.close_requested)
            .field("request_count", &self.request_count)
            .field("timed_out", &self.timed_out.len())
            .field("encrypted", &self.shim.is_some())
            .finish()
    }
}
