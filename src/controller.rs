//! Component C: the Transfer Controller — the heart of the core (spec.md §4.C).
//!
//! Drives a [`TransferSession`] through `starting -> queuing -> {pushing|pulling} -> dequeuing ->
//! completed`, persisting after every stage boundary so a crash leaves a resumable state.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::StoreEngine;
use crate::error::ControllerError;
use crate::exchanger;
use crate::model::{SyncSession, TransferSession, TransferStage};
use crate::store::{self, SyncStore};
use crate::transport::connection::Connection;
use crate::wire::{TransferSessionCreate, TransferSessionPatch};

type Result<T> = std::result::Result<T, ControllerError>;

/// Controller to support the client in initiating syncing and performing related operations.
///
/// Single-threaded per `SyncSession` (spec.md §5): one `initiate_push`/`initiate_pull` call
/// occupies the controller from `STARTING` to `COMPLETED`.
pub struct TransferController<C, S> {
    connection: Arc<C>,
    store: Arc<S>,
    sync_session: SyncSession,
    current_transfer_session: Option<TransferSession>,
    chunk_size: u32,
    serialize_before_queuing: bool,
}

impl<C, S> TransferController<C, S>
where
    C: Connection,
    S: SyncStore,
{
    pub fn new(
        connection: Arc<C>,
        store: Arc<S>,
        sync_session: SyncSession,
        chunk_size: u32,
        serialize_before_queuing: bool,
    ) -> Self {
        TransferController {
            connection,
            store,
            sync_session,
            current_transfer_session: None,
            chunk_size,
            serialize_before_queuing,
        }
    }

    pub fn sync_session(&self) -> &SyncSession {
        &self.sync_session
    }

    pub fn current_transfer_session(&self) -> Option<&TransferSession> {
        self.current_transfer_session.as_ref()
    }

    /// Push `filter`-scoped records to the peer (spec.md §4.C `initiate_push`).
    pub async fn initiate_push<E: StoreEngine>(
        &mut self,
        store_engine: &E,
        filter: &str,
    ) -> Result<()> {
        self.starting(true, filter, store_engine).await?;

        if self.stage() == TransferStage::Queuing {
            info!("preparing records for transfer");
            self.queuing_push(store_engine, filter).await?;
        }

        if self.records_total() == Some(0) {
            self.close_transfer_session().await?;
            return Ok(());
        }

        if self.stage() == TransferStage::Pushing {
            info!(
                records_total = self.records_total(),
                "pushing records to peer"
            );
            self.pushing().await?;
        }

        if self.stage() == TransferStage::Dequeuing {
            info!("peer is dequeuing records");
            self.dequeuing_push().await?;
        }

        Ok(())
    }

    /// Pull `filter`-scoped records from the peer (spec.md §4.C `initiate_pull`).
    pub async fn initiate_pull<E: StoreEngine>(
        &mut self,
        store_engine: &E,
        filter: &str,
    ) -> Result<()> {
        let pending_create = self.starting(false, filter, store_engine).await?;

        if self.stage() == TransferStage::Queuing {
            info!("peer is preparing records for transfer");
            self.queuing_pull(pending_create).await?;
        }

        if self.records_total() == Some(0) {
            self.close_transfer_session().await?;
            return Ok(());
        }

        if self.stage() == TransferStage::Pulling {
            info!(
                records_total = self.records_total(),
                "pulling records from peer"
            );
            self.pulling().await?;
        }

        if self.stage() == TransferStage::Dequeuing {
            info!("deserializing pulled records");
            self.dequeuing_pull(store_engine, filter).await?;
        }

        info!("closing transfer session");
        self.close_transfer_session().await?;
        Ok(())
    }

    /// `close_sync_session` (spec.md §4.C): fails with [`ControllerError::TransferSessionOpen`]
    /// if a transfer session is still current, in memory or (after a crash left this
    /// controller instance with none) still active in the store.
    pub async fn close_sync_session(mut self) -> Result<()> {
        let open_in_store = self
            .store
            .has_active_transfer_session(self.sync_session.id)
            .await?;
        if self.current_transfer_session.is_some() || open_in_store {
            return Err(ControllerError::TransferSessionOpen);
        }
        self.connection
            .close_sync_session(self.sync_session.id)
            .await?;
        self.store.deactivate_sync_session(self.sync_session.id).await?;
        self.sync_session.active = false;
        Ok(())
    }

    fn stage(&self) -> TransferStage {
        self.current_transfer_session
            .as_ref()
            .map(|session| session.transfer_stage)
            .unwrap_or(TransferStage::Completed)
    }

    fn records_total(&self) -> Option<i64> {
        self.current_transfer_session
            .as_ref()
            .and_then(|session| session.records_total)
    }

    /// STARTING (spec.md §4.C). Returns the handshake payload to use for the pull path's
    /// deferred `POST /transfersessions` in QUEUING — unused on the push path, where the
    /// server-side session is created here instead.
    async fn starting<E: StoreEngine>(
        &mut self,
        push: bool,
        filter: &str,
        store_engine: &E,
    ) -> Result<Option<TransferSessionCreate>> {
        let existing = self
            .store
            .find_active_transfer_sessions(self.sync_session.id, filter, push)
            .await?;

        if let Some(resumed) = existing.into_iter().next() {
            info!(transfer_session_id = %resumed.id, push, "resuming sync");
            let others = self
                .store
                .other_active_transfer_session_ids(self.sync_session.id, resumed.id)
                .await?;
            if !others.is_empty() {
                self.store.deactivate_transfer_sessions(&others).await?;
            }

            let pending_create = (!push && resumed.transfer_stage == TransferStage::Queuing).then(
                || TransferSessionCreate {
                    id: resumed.id,
                    filter: resumed.filter.clone(),
                    push: resumed.push,
                    sync_session_id: resumed.sync_session_id,
                    last_activity_timestamp: None,
                    client_fsic: resumed.client_fsic.clone(),
                },
            );

            self.current_transfer_session = Some(resumed);
            return Ok(pending_create);
        }

        if push {
            info!(filter, "beginning sync push");
            let id = Uuid::new_v4();

            if self.serialize_before_queuing {
                store_engine.serialize_into_store(&self.sync_session.profile, filter).await?;
            }
            let client_fsic = store_engine.calculate_filter_max_counters(filter).await?;

            let create = TransferSessionCreate {
                id,
                filter: filter.to_string(),
                push: true,
                sync_session_id: self.sync_session.id,
                last_activity_timestamp: None,
                client_fsic: client_fsic.clone(),
            };

            // Per spec.md §9 Design Notes: do not create (or dereference) a local
            // TransferSession before the server round-trip succeeds, avoiding the original's
            // latent null-dereference on this error path.
            let response = self.connection.create_transfer_session(&create).await?;

            let mut session = store::new_transfer_session(
                id,
                self.sync_session.id,
                true,
                filter.to_string(),
                client_fsic,
                response.server_fsic,
            );
            session.last_activity_timestamp = Utc::now();
            self.store.insert_transfer_session(&session).await?;
            self.current_transfer_session = Some(session);
            Ok(None)
        } else {
            info!(filter, "beginning sync pull");
            let id = Uuid::new_v4();
            let client_fsic = store_engine.calculate_filter_max_counters(filter).await?;

            let session = store::new_transfer_session(
                id,
                self.sync_session.id,
                false,
                filter.to_string(),
                client_fsic.clone(),
                serde_json::json!({}),
            );
            self.store.insert_transfer_session(&session).await?;
            self.current_transfer_session = Some(session);

            Ok(Some(TransferSessionCreate {
                id,
                filter: filter.to_string(),
                push: false,
                sync_session_id: self.sync_session.id,
                last_activity_timestamp: None,
                client_fsic,
            }))
        }
    }

    /// QUEUING, push branch: `queue_into_buffer`, then learn `records_total` locally.
    async fn queuing_push<E: StoreEngine>(&mut self, store_engine: &E, _filter: &str) -> Result<()> {
        let session = self.current_transfer_session.as_mut().expect("in queuing stage");
        store_engine.queue_into_buffer(session.id).await?;
        let records_total = self.store.count_buffers(session.id).await?;

        let session = self.current_transfer_session.as_mut().expect("in queuing stage");
        session.records_total = Some(records_total);
        session.transfer_stage = TransferStage::Pushing;
        session.last_activity_timestamp = Utc::now();
        self.store.update_transfer_session(session).await?;
        Ok(())
    }

    /// QUEUING, pull branch: `POST /transfersessions` triggers the peer's own queuing.
    async fn queuing_pull(&mut self, pending_create: Option<TransferSessionCreate>) -> Result<()> {
        let create = pending_create.expect("pull queuing always has pending create data");
        let result = self.connection.create_transfer_session(&create).await;

        let session = self.current_transfer_session.as_mut().expect("in queuing stage");
        match result {
            Ok(response) => {
                session.server_fsic = response.server_fsic;
                session.records_total = response.records_total;
                session.transfer_stage = TransferStage::Pulling;
                session.last_activity_timestamp = Utc::now();
                self.store.update_transfer_session(session).await?;
                Ok(())
            }
            Err(err) => {
                session.active = false;
                self.store.update_transfer_session(session).await?;
                Err(err.into())
            }
        }
    }

    /// PUSHING (spec.md §4.C).
    async fn pushing(&mut self) -> Result<()> {
        let session = self.current_transfer_session.as_ref().expect("in pushing stage");
        let records_total = session.records_total.unwrap_or(0);
        let transfer_session_id = session.id;

        if let Err(err) = self
            .connection
            .update_transfer_session(transfer_session_id, &TransferSessionPatch { records_total })
            .await
        {
            self.close_transfer_session().await.ok();
            return Err(err.into());
        }

        let session = self.current_transfer_session.as_mut().expect("in pushing stage");
        if let Err(err) = exchanger::push_records(
            self.connection.as_ref(),
            self.store.as_ref(),
            session,
            self.chunk_size,
        )
        .await
        {
            self.close_transfer_session().await.ok();
            return Err(err);
        }

        self.store.delete_buffers(transfer_session_id).await?;
        self.store
            .delete_record_max_counter_buffers(transfer_session_id)
            .await?;

        let session = self.current_transfer_session.as_mut().expect("in pushing stage");
        session.transfer_stage = TransferStage::Dequeuing;
        session.last_activity_timestamp = Utc::now();
        self.store.update_transfer_session(session).await?;
        Ok(())
    }

    /// PULLING (spec.md §4.C).
    async fn pulling(&mut self) -> Result<()> {
        let session = self.current_transfer_session.as_mut().expect("in pulling stage");
        if let Err(err) = exchanger::pull_records(
            self.connection.as_ref(),
            self.store.as_ref(),
            session,
            self.chunk_size,
        )
        .await
        {
            self.close_transfer_session().await.ok();
            return Err(err);
        }

        let session = self.current_transfer_session.as_mut().expect("in pulling stage");
        session.transfer_stage = TransferStage::Dequeuing;
        session.last_activity_timestamp = Utc::now();
        self.store.update_transfer_session(session).await?;
        Ok(())
    }

    /// DEQUEUING, push branch: closing triggers the peer's authoritative dequeue.
    async fn dequeuing_push(&mut self) -> Result<()> {
        self.close_transfer_session().await
    }

    /// DEQUEUING, pull branch: merge locally, then fold the peer's FSIC snapshot into our
    /// database-level counters, then close.
    async fn dequeuing_pull<E: StoreEngine>(&mut self, store_engine: &E, filter: &str) -> Result<()> {
        let session = self.current_transfer_session.as_ref().expect("in dequeuing stage");
        let transfer_session_id = session.id;
        let server_fsic = session.server_fsic.clone();

        store_engine.dequeue_into_store(transfer_session_id).await?;
        store_engine.update_fsics(&server_fsic, filter).await?;
        Ok(())
    }

    /// `close-transfer-session` (spec.md §4.C).
    async fn close_transfer_session(&mut self) -> Result<()> {
        let session = match &self.current_transfer_session {
            Some(session) => session.clone(),
            None => return Ok(()),
        };

        if let Err(err) = self.connection.close_transfer_session(session.id).await {
            let mut session = session;
            session.active = false;
            self.store.update_transfer_session(&session).await?;
            self.current_transfer_session = None;
            return Err(err.into());
        }

        let mut session = session;
        session.active = false;
        session.transfer_stage = TransferStage::Completed;
        session.last_activity_timestamp = Utc::now();
        self.store.update_transfer_session(&session).await?;
        self.current_transfer_session = None;
        Ok(())
    }
}
