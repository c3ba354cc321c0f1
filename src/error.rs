//! Error types for every layer of the sync client.
//!
//! Each subsystem gets its own `thiserror` enum; [`Error`] composes them for callers that
//! drive the whole stack (e.g. [`crate::controller::TransferController`]).

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the [`crate::transport`] layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// All retries were exhausted without a successful response.
    #[error("connection to peer failed after exhausting retries")]
    ConnectionError,
    /// The peer responded with a non-2xx status code.
    #[error("peer returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// The request body or response could not be serialized/deserialized as JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Underlying `reqwest` error that is not a plain non-2xx status (e.g. a malformed URL).
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// The composed endpoint URL was invalid.
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

/// Errors raised while negotiating or persisting a [`crate::model::SyncSession`].
#[derive(Debug, Error)]
pub enum NegotiateError {
    /// The server's handshake signature did not verify under the expected server certificate.
    #[error("server signature did not verify against server certificate")]
    CertificateSignatureInvalid,
    /// A constructor argument was invalid, e.g. a chunk size not a multiple of 100.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while driving a [`crate::model::TransferSession`] through its stages.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// `close_sync_session` was called while a transfer session was still open.
    #[error("sync session has an open transfer session; close it before closing the sync session")]
    TransferSessionOpen,
    /// A chunk pulled from the peer failed buffer-schema validation.
    #[error("pulled record failed schema validation: {0}")]
    SchemaValidation(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Negotiate(#[from] NegotiateError),
}

/// Errors raised by the local persistence layer ([`crate::store`]).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no sync session with id {0}")]
    NoSuchSyncSession(Uuid),
    #[error("no transfer session with id {0}")]
    NoSuchTransferSession(Uuid),
}

/// The top-level error type returned by public [`crate::controller::TransferController`] methods.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Negotiate(#[from] NegotiateError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
