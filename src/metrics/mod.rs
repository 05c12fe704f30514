//! Metrics emitted by the connection core
//!
//! Recorded through the `metrics` facade; nothing is exported unless the application
//! installs a recorder.

pub mod counters;
pub mod histograms;
pub mod labels;

/// Register descriptions for every metric with the installed recorder
pub fn describe() {
    metrics::describe_counter!(
        labels::REQUESTS_ISSUED,
        "Requests written to a connection"
    );
    metrics::describe_counter!(
        labels::REQUESTS_COMPLETED,
        "Requests resolved, by outcome"
    );
    metrics::describe_counter!(
        labels::LATE_RESPONSES,
        "Responses that arrived after their request timed out"
    );
    metrics::describe_counter!(
        labels::CONNECTIONS_DEFUNCT,
        "Connections marked defunct, by reason"
    );
    metrics::describe_counter!(
        labels::FRAME_ERRORS,
        "Inbound frames dropped because the header was invalid"
    );
    metrics::describe_counter!(labels::CONNECTIONS_CLOSED, "Connections closed");
    metrics::describe_histogram!(
        labels::HANDSHAKE_DURATION,
        metrics::Unit::Milliseconds,
        "Time from socket connect to READY"
    );
}
