//! Abstraction around a connection with a syncing peer, supporting the session/transfer/buffer
//! operations used by the rest of the core.
//!
//! Mirrors the distinction spec.md's Design Notes draws from the original implementation's
//! `Connection`/`NetworkSyncConnection` split: `Connection` is a capability set, and
//! [`NetworkConnection`] is the only implemented variant. [`DiskConnection`] is an explicit
//! placeholder (spec.md Non-goals: "the disk-based transport variant is ... left as a TODO").

use async_trait::async_trait;
use reqwest::Method;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::client::{BasicAuth, QueryArgs, Transport};
use crate::transport::api_urls;
use crate::wire::{
    BufferPage, BufferRecord, CertificateChainEntry, CertificateSigningRequest,
    NonceResponse, SyncSessionHandshake, SyncSessionHandshakeResponse, TransferSessionCreate,
    TransferSessionCreateResponse, TransferSessionPatch,
};

/// Per-request parameters that are constant across a `Connection`'s lifetime.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub basic_auth: Option<BasicAuth>,
    pub timeout: std::time::Duration,
    pub max_retries: u32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            basic_auth: None,
            timeout: std::time::Duration::from_secs(3),
            max_retries: 5,
        }
    }
}

/// Capability set over a syncing peer: everything the Session Negotiator, Transfer Controller,
/// and Chunked Exchanger need, independent of how bytes actually move (network or disk).
#[async_trait]
pub trait Connection: Send + Sync {
    /// `GET` the base URL this connection targets, for display/logging purposes.
    fn connection_path(&self) -> String;

    async fn request_nonce(&self) -> Result<NonceResponse, TransportError>;

    async fn get_certificate_chain(
        &self,
        ancestors_of: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError>;

    async fn get_remote_certificates(
        &self,
        primary_partition: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError>;

    async fn certificate_signing_request(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateChainEntry, TransportError>;

    async fn create_sync_session(
        &self,
        handshake: &SyncSessionHandshake,
    ) -> Result<SyncSessionHandshakeResponse, TransportError>;

    async fn close_sync_session(&self, sync_session_id: Uuid) -> Result<(), TransportError>;

    async fn create_transfer_session(
        &self,
        data: &TransferSessionCreate,
    ) -> Result<TransferSessionCreateResponse, TransportError>;

    async fn update_transfer_session(
        &self,
        transfer_session_id: Uuid,
        patch: &TransferSessionPatch,
    ) -> Result<(), TransportError>;

    async fn close_transfer_session(&self, transfer_session_id: Uuid) -> Result<(), TransportError>;

    async fn push_record_chunk(
        &self,
        records: &[BufferRecord],
    ) -> Result<(), TransportError>;

    async fn pull_record_chunk(
        &self,
        transfer_session_id: Uuid,
        limit: u32,
        offset: i64,
    ) -> Result<Vec<BufferRecord>, TransportError>;
}

/// The only implemented [`Connection`]: plain authenticated HTTP, per spec.md §4.A/§6.
pub struct NetworkConnection {
    transport: Transport,
    options: RequestOptions,
}

impl NetworkConnection {
    pub fn new(transport: Transport, options: RequestOptions) -> Self {
        NetworkConnection { transport, options }
    }
}

#[async_trait]
impl Connection for NetworkConnection {
    fn connection_path(&self) -> String {
        self.transport.base_url().to_string()
    }

    async fn request_nonce(&self) -> Result<NonceResponse, TransportError> {
        let response = self
            .transport
            .request(
                api_urls::NONCE,
                Method::POST,
                None,
                None::<&()>,
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn get_certificate_chain(
        &self,
        ancestors_of: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError> {
        let mut query = std::collections::HashMap::new();
        query.insert("ancestors_of".to_string(), ancestors_of.to_string());
        let response = self
            .transport
            .request(
                api_urls::CERTIFICATE,
                Method::GET,
                None,
                None::<&()>,
                Some(QueryArgs::Map(query)),
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn get_remote_certificates(
        &self,
        primary_partition: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError> {
        let mut query = std::collections::HashMap::new();
        query.insert(
            "primary_partition".to_string(),
            primary_partition.to_string(),
        );
        let response = self
            .transport
            .request(
                api_urls::CERTIFICATE,
                Method::GET,
                None,
                None::<&()>,
                Some(QueryArgs::Map(query)),
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn certificate_signing_request(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateChainEntry, TransportError> {
        let response = self
            .transport
            .request(
                api_urls::CERTIFICATE,
                Method::POST,
                None,
                Some(csr),
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn create_sync_session(
        &self,
        handshake: &SyncSessionHandshake,
    ) -> Result<SyncSessionHandshakeResponse, TransportError> {
        let response = self
            .transport
            .request(
                api_urls::SYNCSESSION,
                Method::POST,
                None,
                Some(handshake),
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn close_sync_session(&self, sync_session_id: Uuid) -> Result<(), TransportError> {
        self.transport
            .request(
                api_urls::SYNCSESSION,
                Method::DELETE,
                Some(&sync_session_id.to_string()),
                None::<&()>,
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(())
    }

    async fn create_transfer_session(
        &self,
        data: &TransferSessionCreate,
    ) -> Result<TransferSessionCreateResponse, TransportError> {
        let response = self
            .transport
            .request(
                api_urls::TRANSFERSESSION,
                Method::POST,
                None,
                Some(data),
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn update_transfer_session(
        &self,
        transfer_session_id: Uuid,
        patch: &TransferSessionPatch,
    ) -> Result<(), TransportError> {
        self.transport
            .request(
                api_urls::TRANSFERSESSION,
                Method::PATCH,
                Some(&transfer_session_id.to_string()),
                Some(patch),
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(())
    }

    async fn close_transfer_session(&self, transfer_session_id: Uuid) -> Result<(), TransportError> {
        self.transport
            .request(
                api_urls::TRANSFERSESSION,
                Method::DELETE,
                Some(&transfer_session_id.to_string()),
                None::<&()>,
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(())
    }

    async fn push_record_chunk(&self, records: &[BufferRecord]) -> Result<(), TransportError> {
        self.transport
            .request(
                api_urls::BUFFER,
                Method::POST,
                None,
                Some(records),
                None,
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        Ok(())
    }

    async fn pull_record_chunk(
        &self,
        transfer_session_id: Uuid,
        limit: u32,
        offset: i64,
    ) -> Result<Vec<BufferRecord>, TransportError> {
        let mut query = std::collections::HashMap::new();
        query.insert("limit".to_string(), limit.to_string());
        query.insert("offset".to_string(), offset.to_string());
        query.insert(
            "transfer_session_id".to_string(),
            transfer_session_id.to_string(),
        );
        let response = self
            .transport
            .request(
                api_urls::BUFFER,
                Method::GET,
                None,
                None::<&()>,
                Some(QueryArgs::Map(query)),
                self.options.basic_auth.clone(),
                self.options.timeout,
                self.options.max_retries,
            )
            .await?;
        let page: BufferPage = response.json().await?;
        Ok(page.into_records())
    }
}

/// Disk-based transport. Unimplemented: spec.md §9 Design Notes lists this as an explicit TODO
/// in the original source, and the core's Non-goals carry that forward unchanged.
pub struct DiskConnection {
    pub path: std::path::PathBuf,
}

#[async_trait]
impl Connection for DiskConnection {
    fn connection_path(&self) -> String {
        self.path.display().to_string()
    }

    async fn request_nonce(&self) -> Result<NonceResponse, TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn get_certificate_chain(
        &self,
        _ancestors_of: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn get_remote_certificates(
        &self,
        _primary_partition: &str,
    ) -> Result<Vec<CertificateChainEntry>, TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn certificate_signing_request(
        &self,
        _csr: &CertificateSigningRequest,
    ) -> Result<CertificateChainEntry, TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn create_sync_session(
        &self,
        _handshake: &SyncSessionHandshake,
    ) -> Result<SyncSessionHandshakeResponse, TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn close_sync_session(&self, _sync_session_id: Uuid) -> Result<(), TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn create_transfer_session(
        &self,
        _data: &TransferSessionCreate,
    ) -> Result<TransferSessionCreateResponse, TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn update_transfer_session(
        &self,
        _transfer_session_id: Uuid,
        _patch: &TransferSessionPatch,
    ) -> Result<(), TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn close_transfer_session(&self, _transfer_session_id: Uuid) -> Result<(), TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn push_record_chunk(&self, _records: &[BufferRecord]) -> Result<(), TransportError> {
        todo!("disk-based transport is not implemented")
    }

    async fn pull_record_chunk(
        &self,
        _transfer_session_id: Uuid,
        _limit: u32,
        _offset: i64,
    ) -> Result<Vec<BufferRecord>, TransportError> {
        todo!("disk-based transport is not implemented")
    }
}
