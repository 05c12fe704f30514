//! Response callback that resolves a oneshot channel

use crate::connection::ResponseCallback;
use crate::error::RequestError;
use crate::protocol::{Frame, Message};
use tokio::sync::oneshot;

/// Outcome delivered to the awaiting caller
pub type Response = std::result::Result<Frame, RequestError>;

/// Bridges [`ResponseCallback`] to an awaiting task
///
/// A timeout is delivered as [`RequestError::Timeout`]. If the receiver is gone the
/// outcome is dropped.
#[derive(Debug)]
pub struct ChannelCallback {
    message: Message,
    tx: oneshot::Sender<Response>,
}

impl ChannelCallback {
    /// Create the callback and the receiver for its outcome
    pub fn new(message: Message) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (Self { message, tx }, rx)
    }

    fn resolve(self, response: Response) {
        if self.tx.send(response).is_err() {
            tracing::trace!("response receiver dropped");
        }
    }
}

impl ResponseCallback for ChannelCallback {
    fn request(&self) -> &Message {
        &self.message
    }

    fn on_success(self: Box<Self>, response: Frame) {
        self.resolve(Ok(response));
    }

    fn on_error(self: Box<Self>, error: RequestError) {
        self.resolve(Err(error));
    }

    fn on_timeout(self: Box<Self>) {
        self.resolve(Err(RequestError::Timeout));
    }
}
