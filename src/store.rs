//! Persistence for the core's own entities (spec.md §3): `SyncSession`, `TransferSession`,
//! `Buffer`, `RecordMaxCounterBuffer`.
//!
//! This is distinct from the out-of-scope "Durable Store" collaborator named in spec.md §1,
//! which persists the synced records themselves. This module persists only the sync client's
//! crash-recoverable bookkeeping state, following the same `sqlx`-backed, trait-plus-`SqlitePool`-
//! impl shape as the teacher's `database::customer`/`database::merchant` modules.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Buffer, ConnectionKind, RecordMaxCounterBuffer, SyncSession, TransferSession, TransferStage,
};

type Result<T> = std::result::Result<T, StoreError>;

/// Open (and create, if missing) a SQLite database at `path`, without running migrations.
pub async fn connect_sqlite(path: &str) -> Result<SqlitePool> {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .create_if_missing(true)
        .filename(path);
    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?)
}

/// The sync client's local persistence surface.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Run the migrations in `src/store/migrations/sync/*.sql`.
    async fn migrate(&self) -> Result<()>;

    /// Find the active `SyncSession` for `(client_certificate_id, server_certificate_id,
    /// is_server = false)`, if any (spec.md §3 invariant: at most one).
    async fn find_active_sync_session(
        &self,
        client_certificate_id: &str,
        server_certificate_id: &str,
    ) -> Result<Option<SyncSession>>;

    async fn insert_sync_session(&self, session: &SyncSession) -> Result<()>;

    async fn deactivate_sync_session(&self, id: Uuid) -> Result<()>;

    /// Whether any `TransferSession` under `sync_session_id` is still active, regardless of
    /// `(filter, push)`. Backs `close_sync_session`'s guard, since a crash can leave a
    /// persisted-but-unfinished transfer session with no matching in-memory state.
    async fn has_active_transfer_session(&self, sync_session_id: Uuid) -> Result<bool>;

    /// All `SyncSession`s, most recently started first. Backs the `status` CLI command.
    async fn list_sync_sessions(&self) -> Result<Vec<SyncSession>>;

    /// All `TransferSession`s under `sync_session_id`, most recently active first.
    async fn list_transfer_sessions(&self, sync_session_id: Uuid) -> Result<Vec<TransferSession>>;

    /// All active `TransferSession`s under `sync_session_id` matching `(filter, push)`.
    async fn find_active_transfer_sessions(
        &self,
        sync_session_id: Uuid,
        filter: &str,
        push: bool,
    ) -> Result<Vec<TransferSession>>;

    /// All active `TransferSession` ids under `sync_session_id` *other* than `keep_id`.
    async fn other_active_transfer_session_ids(
        &self,
        sync_session_id: Uuid,
        keep_id: Uuid,
    ) -> Result<Vec<Uuid>>;

    async fn deactivate_transfer_sessions(&self, ids: &[Uuid]) -> Result<()>;

    async fn insert_transfer_session(&self, session: &TransferSession) -> Result<()>;

    async fn get_transfer_session(&self, id: Uuid) -> Result<TransferSession>;

    async fn update_transfer_session(&self, session: &TransferSession) -> Result<()>;

    async fn count_buffers(&self, transfer_session_id: Uuid) -> Result<i64>;

    async fn insert_buffers(&self, buffers: &[Buffer]) -> Result<()>;

    /// Buffered records for a transfer session, ordered by primary key, for a single page of the
    /// push chunk loop (spec.md §4.D).
    async fn buffer_page(
        &self,
        transfer_session_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Buffer>>;

    async fn delete_buffers(&self, transfer_session_id: Uuid) -> Result<()>;

    async fn delete_record_max_counter_buffers(&self, transfer_session_id: Uuid) -> Result<()>;

    async fn insert_record_max_counter_buffers(
        &self,
        buffers: &[RecordMaxCounterBuffer],
    ) -> Result<()>;
}

fn sync_session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncSession> {
    Ok(SyncSession {
        id: row.try_get::<String, _>("id")?.parse().expect("valid uuid"),
        start_timestamp: row.try_get("start_timestamp")?,
        last_activity_timestamp: row.try_get("last_activity_timestamp")?,
        active: row.try_get("active")?,
        is_server: row.try_get("is_server")?,
        client_certificate_id: row.try_get("client_certificate_id")?,
        server_certificate_id: row.try_get("server_certificate_id")?,
        profile: row.try_get("profile")?,
        connection_kind: row.try_get("connection_kind")?,
        connection_path: row.try_get("connection_path")?,
        client_instance: serde_json::from_str(&row.try_get::<String, _>("client_instance")?)?,
        server_instance: serde_json::from_str(&row.try_get::<String, _>("server_instance")?)?,
        client_ip: row.try_get("client_ip")?,
        server_ip: row.try_get("server_ip")?,
    })
}

fn transfer_session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TransferSession> {
    Ok(TransferSession {
        id: row.try_get::<String, _>("id")?.parse().expect("valid uuid"),
        sync_session_id: row
            .try_get::<String, _>("sync_session_id")?
            .parse()
            .expect("valid uuid"),
        push: row.try_get("push")?,
        filter: row.try_get("filter")?,
        last_activity_timestamp: row.try_get("last_activity_timestamp")?,
        active: row.try_get("active")?,
        records_total: row.try_get("records_total")?,
        records_transferred: row.try_get("records_transferred")?,
        client_fsic: serde_json::from_str(&row.try_get::<String, _>("client_fsic")?)?,
        server_fsic: serde_json::from_str(&row.try_get::<String, _>("server_fsic")?)?,
        transfer_stage: row.try_get("transfer_stage")?,
    })
}

#[async_trait]
impl SyncStore for SqlitePool {
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("src/store/migrations/sync").run(self).await?;
        Ok(())
    }

    async fn find_active_sync_session(
        &self,
        client_certificate_id: &str,
        server_certificate_id: &str,
    ) -> Result<Option<SyncSession>> {
        let row = sqlx::query(
            "SELECT * FROM sync_sessions \
             WHERE active = 1 AND is_server = 0 \
             AND client_certificate_id = ? AND server_certificate_id = ? \
             LIMIT 1",
        )
        .bind(client_certificate_id)
        .bind(server_certificate_id)
        .fetch_optional(self)
        .await?;
        row.as_ref().map(sync_session_from_row).transpose()
    }

    async fn insert_sync_session(&self, session: &SyncSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_sessions (
                id, start_timestamp, last_activity_timestamp, active, is_server,
                client_certificate_id, server_certificate_id, profile, connection_kind,
                connection_path, client_instance, server_instance, client_ip, server_ip
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.start_timestamp)
        .bind(session.last_activity_timestamp)
        .bind(session.active)
        .bind(session.is_server)
        .bind(&session.client_certificate_id)
        .bind(&session.server_certificate_id)
        .bind(&session.profile)
        .bind(session.connection_kind)
        .bind(&session.connection_path)
        .bind(serde_json::to_string(&session.client_instance)?)
        .bind(serde_json::to_string(&session.server_instance)?)
        .bind(&session.client_ip)
        .bind(&session.server_ip)
        .execute(self)
        .await?;
        Ok(())
    }

    async fn deactivate_sync_session(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE sync_sessions SET active = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(self)
            .await?;
        Ok(())
    }

    async fn has_active_transfer_session(&self, sync_session_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM transfer_sessions WHERE sync_session_id = ? AND active = 1) AS present",
        )
        .bind(sync_session_id.to_string())
        .fetch_one(self)
        .await?;
        Ok(row.try_get::<i64, _>("present")? != 0)
    }

    async fn list_sync_sessions(&self) -> Result<Vec<SyncSession>> {
        let rows = sqlx::query("SELECT * FROM sync_sessions ORDER BY start_timestamp DESC")
            .fetch_all(self)
            .await?;
        rows.iter().map(sync_session_from_row).collect()
    }

    async fn list_transfer_sessions(&self, sync_session_id: Uuid) -> Result<Vec<TransferSession>> {
        let rows = sqlx::query(
            "SELECT * FROM transfer_sessions WHERE sync_session_id = ? \
             ORDER BY last_activity_timestamp DESC",
        )
        .bind(sync_session_id.to_string())
        .fetch_all(self)
        .await?;
        rows.iter().map(transfer_session_from_row).collect()
    }

    async fn find_active_transfer_sessions(
        &self,
        sync_session_id: Uuid,
        filter: &str,
        push: bool,
    ) -> Result<Vec<TransferSession>> {
        let rows = sqlx::query(
            "SELECT * FROM transfer_sessions \
             WHERE sync_session_id = ? AND filter = ? AND push = ? AND active = 1",
        )
        .bind(sync_session_id.to_string())
        .bind(filter)
        .bind(push)
        .fetch_all(self)
        .await?;
        rows.iter().map(transfer_session_from_row).collect()
    }

    async fn other_active_transfer_session_ids(
        &self,
        sync_session_id: Uuid,
        keep_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM transfer_sessions \
             WHERE sync_session_id = ? AND active = 1 AND id != ?",
        )
        .bind(sync_session_id.to_string())
        .bind(keep_id.to_string())
        .fetch_all(self)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("id").parse().expect("valid uuid"))
            .collect())
    }

    async fn deactivate_transfer_sessions(&self, ids: &[Uuid]) -> Result<()> {
        let mut transaction = self.begin().await?;
        for id in ids {
            sqlx::query(
                "UPDATE transfer_sessions SET active = 0, transfer_stage = 'completed' \
                 WHERE id = ?",
            )
            .bind(id.to_string())
            .execute(&mut transaction)
            .await?;
            sqlx::query("DELETE FROM buffers WHERE transfer_session_id = ?")
                .bind(id.to_string())
                .execute(&mut transaction)
                .await?;
            sqlx::query("DELETE FROM record_max_counter_buffers WHERE transfer_session_id = ?")
                .bind(id.to_string())
                .execute(&mut transaction)
                .await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn insert_transfer_session(&self, session: &TransferSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO transfer_sessions (
                id, sync_session_id, push, filter, last_activity_timestamp, active,
                records_total, records_transferred, client_fsic, server_fsic, transfer_stage
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.sync_session_id.to_string())
        .bind(session.push)
        .bind(&session.filter)
        .bind(session.last_activity_timestamp)
        .bind(session.active)
        .bind(session.records_total)
        .bind(session.records_transferred)
        .bind(serde_json::to_string(&session.client_fsic)?)
        .bind(serde_json::to_string(&session.server_fsic)?)
        .bind(session.transfer_stage)
        .execute(self)
        .await?;
        Ok(())
    }

    async fn get_transfer_session(&self, id: Uuid) -> Result<TransferSession> {
        let row = sqlx::query("SELECT * FROM transfer_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self)
            .await?
            .ok_or(StoreError::NoSuchTransferSession(id))?;
        transfer_session_from_row(&row)
    }

    async fn update_transfer_session(&self, session: &TransferSession) -> Result<()> {
        sqlx::query(
            "UPDATE transfer_sessions SET \
                last_activity_timestamp = ?, active = ?, records_total = ?, \
                records_transferred = ?, client_fsic = ?, server_fsic = ?, transfer_stage = ? \
             WHERE id = ?",
        )
        .bind(session.last_activity_timestamp)
        .bind(session.active)
        .bind(session.records_total)
        .bind(session.records_transferred)
        .bind(serde_json::to_string(&session.client_fsic)?)
        .bind(serde_json::to_string(&session.server_fsic)?)
        .bind(session.transfer_stage)
        .bind(session.id.to_string())
        .execute(self)
        .await?;
        Ok(())
    }

    async fn count_buffers(&self, transfer_session_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM buffers WHERE transfer_session_id = ?")
            .bind(transfer_session_id.to_string())
            .fetch_one(self)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn insert_buffers(&self, buffers: &[Buffer]) -> Result<()> {
        let mut transaction = self.begin().await?;
        for buffer in buffers {
            sqlx::query(
                "INSERT OR REPLACE INTO buffers (transfer_session_id, model_uuid, serialized) \
                 VALUES (?, ?, ?)",
            )
            .bind(buffer.transfer_session_id.to_string())
            .bind(&buffer.model_uuid)
            .bind(serde_json::to_string(&buffer.serialized)?)
            .execute(&mut transaction)
            .await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn buffer_page(
        &self,
        transfer_session_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Buffer>> {
        let rows = sqlx::query(
            "SELECT * FROM buffers WHERE transfer_session_id = ? \
             ORDER BY rowid LIMIT ? OFFSET ?",
        )
        .bind(transfer_session_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(self)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Buffer {
                    transfer_session_id: row
                        .try_get::<String, _>("transfer_session_id")?
                        .parse()
                        .expect("valid uuid"),
                    model_uuid: row.try_get("model_uuid")?,
                    serialized: serde_json::from_str(&row.try_get::<String, _>("serialized")?)?,
                })
            })
            .collect()
    }

    async fn delete_buffers(&self, transfer_session_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM buffers WHERE transfer_session_id = ?")
            .bind(transfer_session_id.to_string())
            .execute(self)
            .await?;
        Ok(())
    }

    async fn delete_record_max_counter_buffers(&self, transfer_session_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM record_max_counter_buffers WHERE transfer_session_id = ?")
            .bind(transfer_session_id.to_string())
            .execute(self)
            .await?;
        Ok(())
    }

    async fn insert_record_max_counter_buffers(
        &self,
        buffers: &[RecordMaxCounterBuffer],
    ) -> Result<()> {
        let mut transaction = self.begin().await?;
        for buffer in buffers {
            sqlx::query(
                "INSERT OR REPLACE INTO record_max_counter_buffers \
                 (transfer_session_id, model_uuid, instance_id, counter) VALUES (?, ?, ?, ?)",
            )
            .bind(buffer.transfer_session_id.to_string())
            .bind(&buffer.model_uuid)
            .bind(&buffer.instance_id)
            .bind(buffer.counter)
            .execute(&mut transaction)
            .await?;
        }
        transaction.commit().await?;
        Ok(())
    }
}

/// Construct a fresh [`SyncSession`] in the shape [`SyncStore::insert_sync_session`] expects.
#[allow(clippy::too_many_arguments)]
pub fn new_sync_session(
    id: Uuid,
    client_certificate_id: String,
    server_certificate_id: String,
    profile: String,
    connection_kind: ConnectionKind,
    connection_path: String,
    client_instance: serde_json::Value,
    server_instance: serde_json::Value,
    client_ip: String,
    server_ip: String,
) -> SyncSession {
    let now = Utc::now();
    SyncSession {
        id,
        start_timestamp: now,
        last_activity_timestamp: now,
        active: true,
        is_server: false,
        client_certificate_id,
        server_certificate_id,
        profile,
        connection_kind,
        connection_path,
        client_instance,
        server_instance,
        client_ip,
        server_ip,
    }
}

/// Construct a fresh [`TransferSession`] at stage [`TransferStage::Queuing`].
pub fn new_transfer_session(
    id: Uuid,
    sync_session_id: Uuid,
    push: bool,
    filter: String,
    client_fsic: serde_json::Value,
    server_fsic: serde_json::Value,
) -> TransferSession {
    TransferSession {
        id,
        sync_session_id,
        push,
        filter,
        last_activity_timestamp: Utc::now(),
        active: true,
        records_total: None,
        records_transferred: 0,
        client_fsic,
        server_fsic,
        transfer_stage: TransferStage::Queuing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_migrated_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("in-memory sqlite");
        pool.migrate().await.expect("migrations apply cleanly");
        pool
    }

    #[tokio::test]
    async fn migrate_is_idempotent_and_tables_exist() {
        let pool = create_migrated_db().await;
        assert_eq!(pool.count_buffers(Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_and_find_active_sync_session_roundtrips() {
        let pool = create_migrated_db().await;
        let session = new_sync_session(
            Uuid::new_v4(),
            "client-cert".into(),
            "server-cert".into(),
            "default".into(),
            ConnectionKind::Network,
            "https://peer.example".into(),
            serde_json::json!({}),
            serde_json::json!({}),
            "127.0.0.1".into(),
            "127.0.0.1".into(),
        );
        pool.insert_sync_session(&session).await.unwrap();

        let found = pool
            .find_active_sync_session("client-cert", "server-cert")
            .await
            .unwrap()
            .expect("session should be found");
        assert_eq!(found.id, session.id);

        pool.deactivate_sync_session(session.id).await.unwrap();
        assert!(pool
            .find_active_sync_session("client-cert", "server-cert")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn buffer_pages_are_ordered_and_deletable() {
        let pool = create_migrated_db().await;
        let transfer_session_id = Uuid::new_v4();
        let buffers: Vec<Buffer> = (0..5)
            .map(|i| Buffer {
                transfer_session_id,
                model_uuid: format!("rec-{}", i),
                serialized: serde_json::json!({ "i": i }),
            })
            .collect();
        pool.insert_buffers(&buffers).await.unwrap();
        assert_eq!(pool.count_buffers(transfer_session_id).await.unwrap(), 5);

        let page = pool.buffer_page(transfer_session_id, 0, 3).await.unwrap();
        assert_eq!(page.len(), 3);

        pool.delete_buffers(transfer_session_id).await.unwrap();
        assert_eq!(pool.count_buffers(transfer_session_id).await.unwrap(), 0);
    }
}
