//! Component B: the Session Negotiator (spec.md §4.B).
//!
//! Creates or reuses a [`SyncSession`], handling the nonce/signature handshake and fetching a
//! missing certificate chain first if needed.

use std::net::UdpSocket;
use std::sync::Arc;

use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::collaborators::CertificateAuthority;
use crate::controller::TransferController;
use crate::error::NegotiateError;
use crate::model::{Certificate, ConnectionKind};
use crate::store::{self, SyncStore};
use crate::transport::connection::Connection;
use crate::wire::SyncSessionHandshake;

/// Creates or reuses a [`crate::model::SyncSession`] and returns a bound
/// [`TransferController`].
pub struct Negotiator<C, S, A> {
    connection: Arc<C>,
    store: Arc<S>,
    certificate_authority: Arc<A>,
    profile: String,
    instance_descriptor: serde_json::Value,
    serialize_before_queuing: bool,
}

impl<C, S, A> Negotiator<C, S, A>
where
    C: Connection,
    S: SyncStore,
    A: CertificateAuthority,
{
    pub fn new(
        connection: Arc<C>,
        store: Arc<S>,
        certificate_authority: Arc<A>,
        profile: String,
        instance_descriptor: serde_json::Value,
        serialize_before_queuing: bool,
    ) -> Self {
        Negotiator {
            connection,
            store,
            certificate_authority,
            profile,
            instance_descriptor,
            serialize_before_queuing,
        }
    }

    /// Create or reuse a [`crate::model::SyncSession`] with `client_cert`/`server_cert`, bound to
    /// a [`TransferController`] that pages records in `chunk_size`-sized chunks.
    ///
    /// `chunk_size` must be a positive multiple of 100 (spec.md §4.B) or this fails with
    /// [`NegotiateError::InvalidArgument`].
    pub async fn create_sync_session(
        &self,
        client_cert: &Certificate,
        server_cert: &Certificate,
        chunk_size: u32,
    ) -> Result<TransferController<C, S>, NegotiateError> {
        if chunk_size == 0 || chunk_size % 100 != 0 {
            return Err(NegotiateError::InvalidArgument(
                "chunk size must be a positive multiple of 100".to_string(),
            ));
        }

        if let Some(active) = self
            .store
            .find_active_sync_session(&client_cert.id, &server_cert.id)
            .await?
        {
            info!(sync_session_id = %active.id, "reusing active sync session");
            return Ok(TransferController::new(
                self.connection.clone(),
                self.store.clone(),
                active,
                chunk_size,
                self.serialize_before_queuing,
            ));
        }

        if self.certificate_authority.get(&server_cert.id).await?.is_none() {
            self.fetch_certificate_chain(server_cert).await?;
        }

        let nonce = self.connection.request_nonce().await?.id;

        let base_url = self.connection.connection_path();
        let (hostname, port) = host_and_port(&base_url);
        let client_ip = client_ip_hint(&hostname, port);
        let server_ip = server_ip_hint(&hostname).await;

        let session_id = Uuid::new_v4();
        let message = format!("{}:{}", nonce, session_id);
        let signature = self.certificate_authority.sign(client_cert, &message);

        let handshake = SyncSessionHandshake {
            id: session_id,
            server_certificate_id: server_cert.id.clone(),
            client_certificate_id: client_cert.id.clone(),
            profile: self.profile.clone(),
            certificate_chain: serde_json::to_string(&[client_cert])?,
            connection_path: base_url.clone(),
            instance: self.instance_descriptor.clone(),
            nonce,
            client_ip: client_ip.clone(),
            server_ip: server_ip.clone(),
            signature,
        };

        let response = self.connection.create_sync_session(&handshake).await?;

        if !self
            .certificate_authority
            .verify(server_cert, &message, &response.signature)
        {
            return Err(NegotiateError::CertificateSignatureInvalid);
        }

        let session = store::new_sync_session(
            session_id,
            client_cert.id.clone(),
            server_cert.id.clone(),
            self.profile.clone(),
            ConnectionKind::Network,
            base_url,
            self.instance_descriptor.clone(),
            response.server_instance,
            client_ip,
            server_ip,
        );
        self.store.insert_sync_session(&session).await?;

        Ok(TransferController::new(
            self.connection.clone(),
            self.store.clone(),
            session,
            chunk_size,
            self.serialize_before_queuing,
        ))
    }

    /// `GET /certificates?primary_partition=` — remote certs for a partition, optionally scoped
    /// to a scope definition. Supplements spec.md's distilled negotiator per `SPEC_FULL.md` §2.
    pub async fn remote_certificates(
        &self,
        primary_partition: &str,
        scope_definition_id: Option<&str>,
    ) -> Result<Vec<Certificate>, NegotiateError> {
        let entries = self
            .connection
            .get_remote_certificates(primary_partition)
            .await?;
        let mut certs = Vec::with_capacity(entries.len());
        for entry in entries {
            let cert = deserialize_certificate(&entry.serialized, entry.signature)?;
            certs.push(cert);
        }
        if let Some(scope_definition_id) = scope_definition_id {
            certs.retain(|cert| cert.scope_definition_id == scope_definition_id);
        }
        Ok(certs)
    }

    /// `POST /certificates` — certificate signing request against `parent_cert`. Supplements
    /// spec.md's distilled negotiator per `SPEC_FULL.md` §2.
    pub async fn certificate_signing_request(
        &self,
        parent_cert: &Certificate,
        scope_definition_id: &str,
        scope_version: i64,
        scope_params: &serde_json::Value,
        public_key: &str,
    ) -> Result<Certificate, NegotiateError> {
        if self
            .certificate_authority
            .get(&parent_cert.id)
            .await?
            .is_none()
        {
            self.fetch_certificate_chain(parent_cert).await?;
        }

        let csr = crate::wire::CertificateSigningRequest {
            parent: parent_cert.id.clone(),
            profile: parent_cert.profile.clone(),
            scope_definition: scope_definition_id.to_string(),
            scope_version,
            scope_params: serde_json::to_string(scope_params)?,
            public_key: public_key.to_string(),
        };
        let entry = self.connection.certificate_signing_request(&csr).await?;
        deserialize_certificate(&entry.serialized, entry.signature)
    }

    async fn fetch_certificate_chain(&self, cert: &Certificate) -> Result<(), NegotiateError> {
        let chain = self.connection.get_certificate_chain(&cert.id).await?;
        let certs: Vec<Certificate> = chain
            .into_iter()
            .map(|entry| deserialize_certificate(&entry.serialized, entry.signature))
            .collect::<Result<_, _>>()?;
        self.certificate_authority
            .save_chain(certs, &cert.id)
            .await?;
        Ok(())
    }
}

fn deserialize_certificate(
    serialized: &str,
    signature: String,
) -> Result<Certificate, NegotiateError> {
    #[derive(serde::Deserialize)]
    struct Body {
        id: String,
        parent_id: Option<String>,
        profile: String,
        #[serde(default)]
        scope_definition_id: String,
    }
    let body: Body = serde_json::from_str(serialized)
        .map_err(|e| NegotiateError::InvalidArgument(format!("malformed certificate: {}", e)))?;
    Ok(Certificate {
        id: body.id,
        parent_id: body.parent_id,
        profile: body.profile,
        scope_definition_id: body.scope_definition_id,
        serialized: serialized.to_string(),
        signature,
    })
}

fn host_and_port(base_url: &str) -> (String, u16) {
    match Url::parse(base_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or(base_url).to_string();
            let port = url.port_or_known_default().unwrap_or(80);
            (host, port)
        }
        Err(_) => (base_url.to_string(), 80),
    }
}

/// Learn the client's local address as seen by the peer, by opening a UDP socket "connected" to
/// the peer's host/port and reading back its local address — this never sends a packet.
/// Falls back to `127.0.0.1` on any failure (spec.md §4.B step 4, §9 Design Notes).
fn client_ip_hint(host: &str, port: u16) -> String {
    (|| -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        Ok(socket.local_addr()?.ip().to_string())
    })()
    .unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Resolve the peer hostname to an IP, failing silently to an empty string on any error
/// (spec.md §4.B step 4).
async fn server_ip_hint(host: &str) -> String {
    tokio::net::lookup_host((host, 0))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}
