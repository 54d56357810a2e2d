use thiserror::Error;

/// Errors a `VenueAdapter` call can fail with. The stage main loop matches on
/// this to decide ack-vs-leave-pending instead of inspecting error strings.
#[derive(Debug, Error)]
pub enum VenueError {
    /// HTTP 5xx, socket failure, rate-limit: retry by leaving the record unacked.
    #[error("transient venue error: {0}")]
    Transient(String),

    /// Invalid size, bad price, closed market: the order is FAILED, not retried.
    #[error("venue rejected order: {0}")]
    Rejected(String),

    /// Response didn't parse into the shape the adapter expects.
    #[error("invalid venue response: {0}")]
    InvalidResponse(String),
}

/// Errors reading a record off the log. `Decode` is a poison-message: ack and
/// move on, since replay cannot succeed. `Unexpected` is left unacknowledged.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not decode record {log_id}: {reason}")]
    Decode { log_id: String, reason: String },

    #[error("unexpected failure processing record {log_id}: {source}")]
    Unexpected {
        log_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    /// Poison-message records are acknowledged even on failure; everything
    /// else is left pending for redelivery.
    pub fn should_ack(&self) -> bool {
        matches!(self, IngestError::Decode { .. })
    }
}
