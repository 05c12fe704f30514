//! Metric names and label values

/// Requests written to a connection
pub const REQUESTS_ISSUED: &str = "cql_wire_requests_issued_total";
/// Requests resolved, labelled by `outcome`
pub const REQUESTS_COMPLETED: &str = "cql_wire_requests_completed_total";
/// Responses matched to a timed out request
pub const LATE_RESPONSES: &str = "cql_wire_late_responses_total";
/// Defunct transitions, labelled by `reason`
pub const CONNECTIONS_DEFUNCT: &str = "cql_wire_connections_defunct_total";
/// Frame header errors
pub const FRAME_ERRORS: &str = "cql_wire_frame_errors_total";
/// Closed connections
pub const CONNECTIONS_CLOSED: &str = "cql_wire_connections_closed_total";
/// Handshake duration in milliseconds
pub const HANDSHAKE_DURATION: &str = "cql_wire_handshake_duration_ms";

/// `outcome` label value
pub const OUTCOME_SUCCESS: &str = "success";
/// `outcome` label value
pub const OUTCOME_SERVER_ERROR: &str = "server_error";
/// `outcome` label value
pub const OUTCOME_ERROR: &str = "error";
/// `outcome` label value
pub const OUTCOME_TIMEOUT: &str = "timeout";
/// `outcome` label value
pub const OUTCOME_CLOSED: &str = "closed";

/// `reason` label value
pub const REASON_CONNECT: &str = "connect";
/// `reason` label value
pub const REASON_STARTUP: &str = "startup";
/// `reason` label value
pub const REASON_WRITE: &str = "write";
/// `reason` label value
pub const REASON_READ: &str = "read";
/// `reason` label value
pub const REASON_PROTOCOL: &str = "protocol";
/// `reason` label value
pub const REASON_TLS: &str = "tls";
