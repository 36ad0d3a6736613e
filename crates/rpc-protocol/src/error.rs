//! The error taxonomy shared by the router, the event emitter, the pub/sub
//! adapter, and the dynamic loader (spec §7). Kinds are semantic, not tied
//! to any particular transport; `rpc-core` maps them onto HTTP status codes
//! and WS drop/log behaviour.

use thiserror::Error;

/// Failure modes of the tagged-JSON codec (C1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed tagged-JSON encoding: {0}")]
    BadEncoding(String),
}

/// An error explicitly raised by a handler or middleware, carrying the HTTP
/// status it should be reported as. Propagates through router and
/// sub-router mounts without reshaping (the "error bubbling" guarantee).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        HttpError {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

/// Errors surfaced by the procedure/router/event layer (spec §7).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Input, body, or WS event payload failed schema validation.
    #[error("validation error: {0}")]
    SchemaMismatch(String),

    /// Raised anywhere; propagates with its original status and message.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Aggregated from event-emitter handler failures after all handlers
    /// for one event have been attempted.
    #[error("{0} of {1} event handler(s) failed")]
    HandlerFailure(usize, usize),

    /// A WS route was invoked without a reachable pub/sub adapter.
    #[error("no pub/sub adapter is configured for this route")]
    MissingAdapter,

    /// Pub/sub transport fault; logged, never fatal, recoverable by retry.
    #[error("subscription error: {0}")]
    SubscriptionError(String),

    #[error("publish error: {0}")]
    PublishError(String),

    /// Dynamic-loader misuse (C10), raised when the deferred router is
    /// first resolved.
    #[error("module has zero exports")]
    EmptyModule,

    #[error("module is ambiguous; candidates: {0:?}")]
    AmbiguousModule(Vec<String>),

    #[error("resolved export is not a router: {0}")]
    NotARouter(String),

    /// A sub-router mount name violated the two-segment mount assumption.
    #[error("invalid mount name: {0}")]
    InvalidMountName(String),
}

impl RpcError {
    /// The HTTP status this error should surface as (spec §6 taxonomy).
    pub fn status(&self) -> u16 {
        match self {
            RpcError::SchemaMismatch(_) => 422,
            RpcError::Http(e) => e.status,
            RpcError::MissingAdapter => 503,
            RpcError::InvalidMountName(_) => 400,
            RpcError::Codec(_) => 400,
            RpcError::HandlerFailure(..)
            | RpcError::SubscriptionError(_)
            | RpcError::PublishError(_)
            | RpcError::EmptyModule
            | RpcError::AmbiguousModule(_)
            | RpcError::NotARouter(_) => 500,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_status_passes_through_unchanged() {
        let err = RpcError::from(HttpError::not_found("missing"));
        assert_eq!(err.status(), 404);
        assert_eq!(err.message(), "404: missing");
    }

    #[test]
    fn schema_mismatch_is_422() {
        assert_eq!(RpcError::SchemaMismatch("bad".into()).status(), 422);
    }

    #[test]
    fn missing_adapter_is_503() {
        assert_eq!(RpcError::MissingAdapter.status(), 503);
    }
}
