//! The core's own persisted entities (spec §3: `SyncSession`, `TransferSession`, `Buffer`,
//! `RecordMaxCounterBuffer`, `Certificate`).
//!
//! These are distinct from the *Durable Store* collaborator (which holds the synced records
//! themselves): this module only models the sync client's crash-recoverable bookkeeping state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a [`SyncSession`] reaches its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Network,
    /// Disk-based transport. Unimplemented placeholder — see [`crate::transport::DiskConnection`].
    Disk,
}

/// The stage a [`TransferSession`] currently occupies in its lifecycle (spec §4.C).
///
/// Transitions are totally ordered: `Starting < Queuing < {Pushing, Pulling} < Dequeuing <
/// Completed`, and are persisted immediately after each stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransferStage {
    Queuing,
    Pushing,
    Pulling,
    Dequeuing,
    Completed,
}

/// An immutable, content-addressable signed public key handle.
///
/// The core treats certificates as opaque except to look them up by id, request a chain from a
/// peer, and hand them to the (out-of-scope) Certificate Authority collaborator for verification
/// or signing. See [`crate::collaborators::CertificateAuthority`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub parent_id: Option<String>,
    pub profile: String,
    /// The scope definition this certificate was issued under — distinct from `profile` (the
    /// partition namespace); used to filter a peer's remote certificates down to the scope a
    /// caller cares about (spec.md GLOSSARY, `SPEC_FULL.md` §2).
    pub scope_definition_id: String,
    /// Opaque serialized certificate body, as produced by the Certificate Authority collaborator.
    pub serialized: String,
    pub signature: String,
}

/// A long-lived logical association between two peers for one
/// `(client_cert, server_cert, profile)` triple.
///
/// Invariant: at most one *active* `SyncSession` per `(client_certificate_id,
/// server_certificate_id, is_server = false)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: Uuid,
    pub start_timestamp: chrono::DateTime<chrono::Utc>,
    pub last_activity_timestamp: chrono::DateTime<chrono::Utc>,
    pub active: bool,
    pub is_server: bool,
    pub client_certificate_id: String,
    pub server_certificate_id: String,
    pub profile: String,
    pub connection_kind: ConnectionKind,
    pub connection_path: String,
    pub client_instance: Value,
    pub server_instance: Value,
    pub client_ip: String,
    pub server_ip: String,
}

/// One push or pull episode scoped by a filter (spec §3 `TransferSession`).
///
/// Invariants:
/// - for any `SyncSession`, at most one active `TransferSession` per `(filter, push)`;
/// - `records_transferred <= records_total` once `records_total` is set (`Some`);
/// - `push` implies `stage` is one of `{Queuing, Pushing, Dequeuing, Completed}`;
/// - `!push` implies `stage` is one of `{Queuing, Pulling, Dequeuing, Completed}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSession {
    pub id: Uuid,
    pub sync_session_id: Uuid,
    pub push: bool,
    pub filter: String,
    pub last_activity_timestamp: chrono::DateTime<chrono::Utc>,
    pub active: bool,
    pub records_total: Option<i64>,
    pub records_transferred: i64,
    pub client_fsic: Value,
    pub server_fsic: Value,
    pub transfer_stage: TransferStage,
}

impl TransferSession {
    /// Checks the stage invariant for the `push` direction this session was created with.
    pub fn stage_is_valid_for_direction(&self) -> bool {
        use TransferStage::*;
        match self.push {
            true => matches!(self.transfer_stage, Queuing | Pushing | Dequeuing | Completed),
            false => matches!(self.transfer_stage, Queuing | Pulling | Dequeuing | Completed),
        }
    }
}

/// A staging row produced/consumed by the Store Engine collaborator, keyed by
/// `(transfer_session_id, model_uuid)` (unique together).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buffer {
    pub transfer_session_id: Uuid,
    pub model_uuid: String,
    pub serialized: Value,
}

/// A staging row of per-instance forward-seen-index-counters, consumed alongside [`Buffer`] rows
/// during dequeuing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMaxCounterBuffer {
    pub transfer_session_id: Uuid,
    pub model_uuid: String,
    pub instance_id: String,
    pub counter: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_stage_is_valid_for_exactly_one_direction() {
        for stage in TransferStage::iter() {
            let push = TransferSession {
                transfer_stage: stage,
                ..dummy_transfer_session(true)
            };
            let pull = TransferSession {
                transfer_stage: stage,
                ..dummy_transfer_session(false)
            };
            assert!(push.stage_is_valid_for_direction() || pull.stage_is_valid_for_direction());
        }
    }

    fn dummy_transfer_session(push: bool) -> TransferSession {
        TransferSession {
            id: Uuid::new_v4(),
            sync_session_id: Uuid::new_v4(),
            push,
            filter: "filter".to_string(),
            last_activity_timestamp: chrono::Utc::now(),
            active: true,
            records_total: None,
            records_transferred: 0,
            client_fsic: Value::Null,
            server_fsic: Value::Null,
            transfer_stage: TransferStage::Queuing,
        }
    }
}
