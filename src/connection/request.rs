//! Per-request lifecycle
//!
//! ```text
//! NEW ──start_write──▶ WRITING ──write ok──▶ READING ──response──▶ DONE
//!                         │                     │
//!                         └──── timer expiry ───┴──▶ TIMED_OUT ──late response──▶ released
//! ```
//!
//! A request that timed out has already reported `on_timeout`, but it keeps its stream
//! id until the server answers, because the id cannot be reused while a response for it
//! may still arrive.

use super::timer::{TimerId, Timers};
use crate::error::RequestError;
use crate::protocol::{Frame, Message};
use std::time::{Duration, Instant};

/// Receives the outcome of one request
///
/// Exactly one of `on_success`, `on_error` or `on_timeout` is called, once. The
/// resolution methods consume the box, so a second resolution cannot be written.
pub trait ResponseCallback: Send {
    /// Message to send; the connection assigns the stream id
    fn request(&self) -> &Message;

    /// The server answered with a non-ERROR frame
    fn on_success(self: Box<Self>, response: Frame);

    /// The request failed (write error, server ERROR frame, connection closed, ...)
    fn on_error(self: Box<Self>, error: RequestError);

    /// No response arrived within the write or read timeout
    fn on_timeout(self: Box<Self>);
}

/// Unique, never reused request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

/// Request state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Created, nothing written yet
    New,
    /// Frame handed to the socket, awaiting write completion
    Writing,
    /// Written, awaiting the response
    Reading,
    /// Timer fired before a response; callback already resolved
    TimedOut,
    /// Resolved
    Done,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Writing => write!(f, "writing"),
            Self::Reading => write!(f, "reading"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Who receives the response
pub(crate) enum Handler {
    /// One step of the OPTIONS/STARTUP handshake, handled by the connection itself
    Startup(Message),
    /// Application request
    Callback(Box<dyn ResponseCallback>),
}

impl Handler {
    pub(crate) fn message(&self) -> &Message {
        match self {
            Handler::Startup(message) => message,
            Handler::Callback(callback) => callback.request(),
        }
    }
}

/// Timer owner tag used by the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerOwner {
    Connect,
    Request { stream: i8, id: RequestId },
}

/// One outstanding request, owned by the stream table
pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) stream: Option<i8>,
    pub(crate) state: RequestState,
    timer: Option<TimerId>,
    handler: Option<Handler>,
}

impl Request {
    pub(crate) fn new(id: RequestId, handler: Handler) -> Self {
        Self {
            id,
            stream: None,
            state: RequestState::New,
            timer: None,
            handler: Some(handler),
        }
    }

    /// Give the handler back without resolving it
    pub(crate) fn into_handler(mut self) -> Option<Handler> {
        self.handler.take()
    }

    pub(crate) fn message(&self) -> Option<&Message> {
        self.handler.as_ref().map(Handler::message)
    }

    /// NEW → WRITING, arming the write timeout
    pub(crate) fn start_write(
        &mut self,
        timers: &mut Timers<TimerOwner>,
        now: Instant,
        timeout: Duration,
    ) {
        self.state = RequestState::Writing;
        self.arm(timers, now, timeout);
    }

    /// WRITING → READING, arming the read timeout
    pub(crate) fn start_read(
        &mut self,
        timers: &mut Timers<TimerOwner>,
        now: Instant,
        timeout: Duration,
    ) {
        self.stop_timer(timers);
        self.state = RequestState::Reading;
        self.arm(timers, now, timeout);
    }

    /// Stop the running timer, if any
    pub(crate) fn stop_timer(&mut self, timers: &mut Timers<TimerOwner>) {
        if let Some(timer) = self.timer.take() {
            timers.stop(timer);
        }
    }

    /// The running timer fired
    ///
    /// Moves to TIMED_OUT and hands back the handler so the caller can report the
    /// timeout. Returns `None` if the request was not waiting on that timer.
    pub(crate) fn time_out(&mut self, timer: TimerId) -> Option<Handler> {
        if self.timer != Some(timer) {
            return None;
        }
        self.timer = None;
        if !matches!(self.state, RequestState::Writing | RequestState::Reading) {
            return None;
        }
        self.state = RequestState::TimedOut;
        self.handler.take()
    }

    /// Resolve the request, stopping its timer and handing back the handler
    ///
    /// Returns `None` for a request that already timed out: its callback has fired.
    pub(crate) fn finish(&mut self, timers: &mut Timers<TimerOwner>) -> Option<Handler> {
        self.stop_timer(timers);
        if self.state == RequestState::TimedOut {
            return None;
        }
        self.state = RequestState::Done;
        self.handler.take()
    }

    pub(crate) fn is_timed_out(&self) -> bool {
        self.state == RequestState::TimedOut
    }

    fn arm(&mut self, timers: &mut Timers<TimerOwner>, now: Instant, timeout: Duration) {
        if let Some(stream) = self.stream {
            self.timer = Some(timers.start(
                now,
                timeout,
                TimerOwner::Request {
                    stream,
                    id: self.id,
                },
            ));
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("state", &self.state)
            .field("timer", &self.timer)
            .field("resolved", &self.handler.is_none())
            .finish()
    }
}
