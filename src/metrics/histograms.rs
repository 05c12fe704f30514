//! Histogram helpers

use super::labels;
use std::time::Duration;

/// Time from socket connect until the connection became ready
pub fn handshake_duration(elapsed: Duration) {
    metrics::histogram!(labels::HANDSHAKE_DURATION).record(elapsed.as_secs_f64() * 1000.0);
}
