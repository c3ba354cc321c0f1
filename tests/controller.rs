//! Integration tests for the Transfer Controller's stage machine (spec.md §8), driven against
//! fake `Connection`/`StoreEngine`/`CertificateAuthority` implementations rather than a live
//! peer, mirroring the teacher's `tests/tezos.rs` + `tests/common/mod.rs` split.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use morango_sync::collaborators::{CertificateAuthority, StoreEngine};
use morango_sync::config::DatabaseLocation;
use morango_sync::error::{ControllerError, NegotiateError, StoreError, TransportError};
use morango_sync::model::{Certificate, ConnectionKind, TransferStage};
use morango_sync::negotiate::Negotiator;
use morango_sync::store::{self, SyncStore};
use morango_sync::transport::connection::Connection;
use morango_sync::wire::{
    BufferRecord, CertificateChainEntry, CertificateSigningRequest, NonceResponse,
    SyncSessionHandshake, SyncSessionHandshakeResponse, TransferSessionCreate,
    TransferSessionCreateResponse, TransferSessionPatch,
};

async fn migrated_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("in-memory sqlite");
    pool.migrate().await.expect("migrations apply cleanly");
    pool
}

fn client_cert() -> Certificate {
    Certificate {
        id: "client-cert".to_string(),
        parent_id: None,
        profile: "default".to_string(),
        scope_definition_id: "full-facility".to_string(),
        serialized: json!({
            "id": "client-cert",
            "parent_id": Value::Null,
            "profile": "default",
            "scope_definition_id": "full-facility",
        })
        .to_string(),
        signature: "sig".to_string(),
    }
}

fn server_cert() -> Certificate {
    Certificate {
        id: "server-cert".to_string(),
        parent_id: None,
        profile: "default".to_string(),
        scope_definition_id: "full-facility".to_string(),
        serialized: json!({
            "id": "server-cert",
            "parent_id": Value::Null,
            "profile": "default",
            "scope_definition_id": "full-facility",
        })
        .to_string(),
        signature: "sig".to_string(),
    }
}

/// An in-memory `Connection` fake: records pushed chunks, serves a fixed-size pool of pull
/// records, and signs handshakes by echoing the message — paired with
/// [`FakeCertificateAuthority`], whose `verify` checks for exactly that echo.
struct FakeConnection {
    total_records: usize,
    chunks_pushed: Mutex<Vec<usize>>,
    should_sign_correctly: bool,
}

impl FakeConnection {
    fn new(total_records: usize) -> Self {
        FakeConnection {
            total_records,
            chunks_pushed: Mutex::new(Vec::new()),
            should_sign_correctly: true,
        }
    }

    fn mismatched_signature(total_records: usize) -> Self {
        FakeConnection {
            total_records,
            chunks_pushed: Mutex::new(Vec::new()),
            should_sign_correctly: false,
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn connection_path(&self) -> String {
        "fake://peer".to_string()
    }

    async fn request_nonce(&self) -> Result<NonceResponse, TransportError> {
        Ok(NonceResponse { id: "nonce".to_string() })
    }

    async fn get_certificate_chain(
        &self,
        _ancestors_of: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError> {
        Ok(Vec::new())
    }

    async fn get_remote_certificates(
        &self,
        _primary_partition: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError> {
        Ok(Vec::new())
    }

    async fn certificate_signing_request(
        &self,
        _csr: &CertificateSigningRequest,
    ) -> Result<CertificateChainEntry, TransportError> {
        unimplemented!("not exercised by these tests")
    }

    async fn create_sync_session(
        &self,
        handshake: &SyncSessionHandshake,
    ) -> Result<SyncSessionHandshakeResponse, TransportError> {
        let message = format!("{}:{}", handshake.nonce, handshake.id);
        let signature = if self.should_sign_correctly {
            message
        } else {
            "garbage".to_string()
        };
        Ok(SyncSessionHandshakeResponse {
            signature,
            server_instance: json!({}),
        })
    }

    async fn close_sync_session(&self, _sync_session_id: Uuid) -> Result<(), TransportError> {
        Ok(())
    }

    async fn create_transfer_session(
        &self,
        _data: &TransferSessionCreate,
    ) -> Result<TransferSessionCreateResponse, TransportError> {
        Ok(TransferSessionCreateResponse {
            server_fsic: json!({}),
            records_total: Some(self.total_records as i64),
        })
    }

    async fn update_transfer_session(
        &self,
        _transfer_session_id: Uuid,
        _patch: &TransferSessionPatch,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close_transfer_session(&self, _transfer_session_id: Uuid) -> Result<(), TransportError> {
        Ok(())
    }

    async fn push_record_chunk(&self, records: &[BufferRecord]) -> Result<(), TransportError> {
        self.chunks_pushed.lock().unwrap().push(records.len());
        Ok(())
    }

    async fn pull_record_chunk(
        &self,
        _transfer_session_id: Uuid,
        limit: u32,
        offset: i64,
    ) -> Result<Vec<BufferRecord>, TransportError> {
        let offset = offset as usize;
        let limit = limit as usize;
        let remaining = self.total_records.saturating_sub(offset);
        let page_len = remaining.min(limit);
        Ok((0..page_len)
            .map(|i| json!({ "model_uuid": format!("rec-{}-{}", offset, i) }))
            .collect())
    }
}

/// Signs/verifies by echoing the message back; pairs with [`FakeConnection`]'s handshake logic.
struct FakeCertificateAuthority;

#[async_trait]
impl CertificateAuthority for FakeCertificateAuthority {
    async fn get(&self, _id: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(Some(client_cert()))
    }

    fn sign(&self, _signer: &Certificate, message: &str) -> String {
        message.to_string()
    }

    fn verify(&self, _signer: &Certificate, message: &str, signature: &str) -> bool {
        signature == message
    }

    async fn save_chain(
        &self,
        _chain: Vec<Certificate>,
        _expected_last_id: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Queues `record_count` opaque records into the buffer table on `queue_into_buffer`, and counts
/// calls to the dequeue/fsic-merge operations.
struct FakeStoreEngine {
    record_count: usize,
    pool: SqlitePool,
    dequeue_calls: AtomicUsize,
    fsic_merge_calls: AtomicUsize,
}

impl FakeStoreEngine {
    fn new(pool: SqlitePool, record_count: usize) -> Self {
        FakeStoreEngine {
            record_count,
            pool,
            dequeue_calls: AtomicUsize::new(0),
            fsic_merge_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StoreEngine for FakeStoreEngine {
    async fn serialize_into_store(&self, _profile: &str, _filter: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn queue_into_buffer(&self, transfer_session_id: Uuid) -> Result<(), StoreError> {
        let buffers: Vec<morango_sync::model::Buffer> = (0..self.record_count)
            .map(|i| morango_sync::model::Buffer {
                transfer_session_id,
                model_uuid: format!("rec-{}", i),
                serialized: json!({ "model_uuid": format!("rec-{}", i) }),
            })
            .collect();
        self.pool.insert_buffers(&buffers).await?;
        Ok(())
    }

    async fn dequeue_into_store(&self, _transfer_session_id: Uuid) -> Result<(), StoreError> {
        self.dequeue_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn calculate_filter_max_counters(&self, _filter: &str) -> Result<Value, StoreError> {
        Ok(json!({}))
    }

    async fn update_fsics(&self, _server_fsic: &Value, _filter: &str) -> Result<(), StoreError> {
        self.fsic_merge_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn negotiator(
    pool: SqlitePool,
    connection: FakeConnection,
) -> Negotiator<FakeConnection, SqlitePool, FakeCertificateAuthority> {
    Negotiator::new(
        Arc::new(connection),
        Arc::new(pool),
        Arc::new(FakeCertificateAuthority),
        "default".to_string(),
        json!({ "instance": "test" }),
        true,
    )
}

#[tokio::test]
async fn rejects_chunk_size_not_a_multiple_of_100() {
    let pool = migrated_pool().await;
    let negotiator = negotiator(pool, FakeConnection::new(0));

    let err = negotiator
        .create_sync_session(&client_cert(), &server_cert(), 250)
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiateError::InvalidArgument(_)));
}

#[tokio::test]
async fn rejects_mismatched_handshake_signature() {
    let pool = migrated_pool().await;
    let negotiator = negotiator(pool, FakeConnection::mismatched_signature(0));

    let err = negotiator
        .create_sync_session(&client_cert(), &server_cert(), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiateError::CertificateSignatureInvalid));
}

#[tokio::test]
async fn empty_push_closes_immediately() {
    let pool = migrated_pool().await;
    let store_engine = FakeStoreEngine::new(pool.clone(), 0);
    let negotiator = negotiator(pool.clone(), FakeConnection::new(0));

    let mut controller = negotiator
        .create_sync_session(&client_cert(), &server_cert(), 500)
        .await
        .unwrap();

    controller.initiate_push(&store_engine, "my-filter").await.unwrap();
    assert!(controller.current_transfer_session().is_none());
}

#[tokio::test]
async fn push_of_1500_records_at_chunk_size_500_pages_three_times() {
    let pool = migrated_pool().await;
    let store_engine = FakeStoreEngine::new(pool.clone(), 1500);
    let connection = Arc::new(FakeConnection::new(1500));
    let negotiator = Negotiator::new(
        connection.clone(),
        Arc::new(pool),
        Arc::new(FakeCertificateAuthority),
        "default".to_string(),
        json!({}),
        true,
    );

    let mut controller = negotiator
        .create_sync_session(&client_cert(), &server_cert(), 500)
        .await
        .unwrap();

    controller.initiate_push(&store_engine, "my-filter").await.unwrap();
    assert!(controller.current_transfer_session().is_none());
    assert_eq!(
        connection.chunks_pushed.lock().unwrap().clone(),
        vec![500, 500, 500]
    );
}

#[tokio::test]
async fn close_sync_session_rejects_a_transfer_session_left_active_by_a_prior_crash() {
    let pool = migrated_pool().await;
    let client = client_cert();
    let server = server_cert();

    let sync_session_id = Uuid::new_v4();
    let sync_session = store::new_sync_session(
        sync_session_id,
        client.id.clone(),
        server.id.clone(),
        "default".to_string(),
        ConnectionKind::Network,
        "fake://peer".to_string(),
        json!({}),
        json!({}),
        "127.0.0.1".to_string(),
        "127.0.0.1".to_string(),
    );
    pool.insert_sync_session(&sync_session).await.unwrap();

    // Simulate a process that crashed mid-push: the transfer session is still active in the
    // store, but this fresh controller's in-memory state knows nothing about it.
    let stranded = store::new_transfer_session(
        Uuid::new_v4(),
        sync_session_id,
        true,
        "stranded-filter".to_string(),
        json!({}),
        json!({}),
    );
    pool.insert_transfer_session(&stranded).await.unwrap();

    let negotiator = negotiator(pool, FakeConnection::new(0));
    let controller = negotiator
        .create_sync_session(&client, &server, 500)
        .await
        .unwrap();

    let err = controller.close_sync_session().await.unwrap_err();
    assert!(matches!(err, ControllerError::TransferSessionOpen));
}

#[tokio::test]
async fn resumes_a_mid_pull_transfer_session_and_completes() {
    let pool = migrated_pool().await;
    let client = client_cert();
    let server = server_cert();

    let sync_session_id = Uuid::new_v4();
    let sync_session = store::new_sync_session(
        sync_session_id,
        client.id.clone(),
        server.id.clone(),
        "default".to_string(),
        ConnectionKind::Network,
        "fake://peer".to_string(),
        json!({}),
        json!({}),
        "127.0.0.1".to_string(),
        "127.0.0.1".to_string(),
    );
    pool.insert_sync_session(&sync_session).await.unwrap();

    let transfer_session_id = Uuid::new_v4();
    let mut transfer_session = store::new_transfer_session(
        transfer_session_id,
        sync_session_id,
        false,
        "resume-filter".to_string(),
        json!({}),
        json!({}),
    );
    transfer_session.transfer_stage = TransferStage::Pulling;
    transfer_session.records_total = Some(750);
    transfer_session.records_transferred = 500;
    pool.insert_transfer_session(&transfer_session).await.unwrap();

    let store_engine = FakeStoreEngine::new(pool.clone(), 0);
    let negotiator = negotiator(pool.clone(), FakeConnection::new(750));

    let mut controller = negotiator
        .create_sync_session(&client, &server, 500)
        .await
        .unwrap();
    assert_eq!(
        controller.sync_session().id,
        sync_session_id,
        "the existing active sync session should be reused, not re-negotiated"
    );

    controller
        .initiate_pull(&store_engine, "resume-filter")
        .await
        .unwrap();
    assert!(controller.current_transfer_session().is_none());
    assert_eq!(store_engine.dequeue_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store_engine.fsic_merge_calls.load(Ordering::SeqCst), 1);

    let persisted = pool.get_transfer_session(transfer_session_id).await.unwrap();
    assert_eq!(persisted.transfer_stage, TransferStage::Completed);
    assert!(!persisted.active);
}
