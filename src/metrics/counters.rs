//! Counter helpers

use super::labels;

/// A request was handed to the socket
pub fn request_issued() {
    metrics::counter!(labels::REQUESTS_ISSUED).increment(1);
}

/// A request resolved with `outcome`
pub fn request_completed(outcome: &'static str) {
    metrics::counter!(labels::REQUESTS_COMPLETED, "outcome" => outcome).increment(1);
}

/// A response arrived for a request that had already timed out
pub fn late_response() {
    metrics::counter!(labels::LATE_RESPONSES).increment(1);
}

/// The connection became defunct
pub fn connection_defunct(reason: &'static str) {
    metrics::counter!(labels::CONNECTIONS_DEFUNCT, "reason" => reason).increment(1);
}

/// An inbound frame header was rejected
pub fn frame_error() {
    metrics::counter!(labels::FRAME_ERRORS).increment(1);
}

/// The socket was closed
pub fn connection_closed() {
    metrics::counter!(labels::CONNECTIONS_CLOSED).increment(1);
}
