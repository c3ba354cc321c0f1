//! JSON payload shapes for every endpoint in spec.md §6's wire protocol table.
//!
//! These are plain serde structs, not `prost`/`tonic` messages: the wire format here is JSON over
//! HTTP, per spec.md §4.A/§6, not the teacher's length-delimited bincode session types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `POST /nonces` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceResponse {
    pub id: String,
}

/// One entry of a `GET /certificates?ancestors_of=` or `?primary_partition=` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateChainEntry {
    pub serialized: String,
    pub signature: String,
}

/// `POST /certificates` request body (certificate signing request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSigningRequest {
    pub parent: String,
    pub profile: String,
    pub scope_definition: String,
    pub scope_version: i64,
    pub scope_params: String,
    pub public_key: String,
}

/// `POST /syncsessions` request body: the handshake payload (spec.md §4.B step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSessionHandshake {
    pub id: Uuid,
    pub server_certificate_id: String,
    pub client_certificate_id: String,
    pub profile: String,
    pub certificate_chain: String,
    pub connection_path: String,
    pub instance: Value,
    pub nonce: String,
    pub client_ip: String,
    pub server_ip: String,
    pub signature: String,
}

/// `POST /syncsessions` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSessionHandshakeResponse {
    pub signature: String,
    pub server_instance: Value,
}

/// `POST /transfersessions` request body (spec.md §4.C STARTING/`_generate_transfer_session_data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSessionCreate {
    pub id: Uuid,
    pub filter: String,
    pub push: bool,
    pub sync_session_id: Uuid,
    /// Omitted on the wire for the push path per spec.md §4.C STARTING ("remove the local
    /// `last_activity_timestamp` from the payload"); present for pulls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_timestamp: Option<DateTime<Utc>>,
    pub client_fsic: Value,
}

/// `POST /transfersessions` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSessionCreateResponse {
    pub server_fsic: Value,
    #[serde(default)]
    pub records_total: Option<i64>,
}

/// `PATCH /transfersessions/{id}` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSessionPatch {
    pub records_total: i64,
}

/// One record in a `POST /buffers` request body or a bare-array `GET /buffers` response.
pub type BufferRecord = Value;

/// `GET /buffers` may answer with a bare array or a paginated envelope; accept both
/// (spec.md §4.D).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BufferPage {
    Bare(Vec<BufferRecord>),
    Paginated { results: Vec<BufferRecord> },
}

impl BufferPage {
    pub fn into_records(self) -> Vec<BufferRecord> {
        match self {
            BufferPage::Bare(records) => records,
            BufferPage::Paginated { results } => results,
        }
    }
}
