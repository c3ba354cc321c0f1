//! Trait-only interfaces to the components spec.md §1 explicitly keeps out of the core's scope.
//!
//! The Transfer Controller calls these at stage boundaries; it never implements them. A host
//! application supplies concrete implementations (e.g. backed by whatever merge engine and
//! certificate infrastructure it runs).

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::Certificate;

/// The record-level merge engine: serializes buffered records out of and back into the local
/// store, and computes filter-scoped forward-seen-index-counter snapshots.
///
/// Collaborator named "Store Engine" in spec.md §1/§4.
#[async_trait]
pub trait StoreEngine: Send + Sync {
    /// Flush the working set for `profile` scoped by `filter` into the serializable store.
    ///
    /// Invoked before computing `client_fsic` on a push, when
    /// [`crate::config::Config::serialize_before_queuing`] is set (spec.md §4.B).
    async fn serialize_into_store(&self, profile: &str, filter: &str) -> Result<(), StoreError>;

    /// Populate [`crate::model::Buffer`] rows for `transfer_session_id` ahead of a push.
    async fn queue_into_buffer(&self, transfer_session_id: Uuid) -> Result<(), StoreError>;

    /// Merge pulled [`crate::model::Buffer`] rows for `transfer_session_id` into the local store.
    async fn dequeue_into_store(&self, transfer_session_id: Uuid) -> Result<(), StoreError>;

    /// Compute the forward-seen-index-counter snapshot for records matching `filter`.
    async fn calculate_filter_max_counters(&self, filter: &str) -> Result<Value, StoreError>;

    /// Update the local database-level max counters with a peer-supplied snapshot, scoped to
    /// `filter`. Called after a successful pull (spec.md §4.C DEQUEUING, pull branch).
    async fn update_fsics(&self, server_fsic: &Value, filter: &str) -> Result<(), StoreError>;
}

/// The certificate chain, signing, and trust model.
///
/// Collaborator named "Certificate Authority" in spec.md §1. The core never holds private key
/// material or performs cryptographic verification itself; it only moves certificates over the
/// wire and asks this collaborator to sign, verify, or persist them.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Look up a certificate by id, if known locally.
    async fn get(&self, id: &str) -> Result<Option<Certificate>, StoreError>;

    /// Sign `message` with `signer`'s private key, returning an opaque signature.
    fn sign(&self, signer: &Certificate, message: &str) -> String;

    /// Verify that `signature` over `message` was produced by `signer`'s private key.
    fn verify(&self, signer: &Certificate, message: &str, signature: &str) -> bool;

    /// Persist a fetched ancestor chain, verifying it terminates at `expected_last_id`.
    ///
    /// Supplements spec.md's distilled Session Negotiator with the original implementation's
    /// `Certificate.save_certificate_chain` behavior (see `SPEC_FULL.md` §2).
    async fn save_chain(
        &self,
        chain: Vec<Certificate>,
        expected_last_id: &str,
    ) -> Result<(), StoreError>;
}
