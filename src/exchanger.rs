//! Component D: the Chunked Exchanger (spec.md §4.D).
//!
//! Moves `Buffer` rows across the wire in `chunk_size`-sized pages, advancing
//! `records_transferred` by a full chunk on every successful round whether or not the chunk
//! came back full — the cursor tracks progress through the chunk schedule, not bytes seen.

use serde_json::Value;

use crate::error::ControllerError;
use crate::model::{Buffer, TransferSession};
use crate::store::SyncStore;
use crate::transport::connection::Connection;

type Result<T> = std::result::Result<T, ControllerError>;

/// PUSHING (spec.md §4.D push branch): page local buffers out to the peer.
pub async fn push_records<C: Connection, S: SyncStore>(
    connection: &C,
    store: &S,
    session: &mut TransferSession,
    chunk_size: u32,
) -> Result<()> {
    let records_total = session.records_total.unwrap_or(0);

    while session.records_transferred < records_total {
        let page = store
            .buffer_page(session.id, session.records_transferred, chunk_size as i64)
            .await?;
        let records: Vec<Value> = page.into_iter().map(|buffer| buffer.serialized).collect();

        connection.push_record_chunk(&records).await?;

        session.records_transferred += chunk_size as i64;
        store.update_transfer_session(session).await?;
    }

    Ok(())
}

/// PULLING (spec.md §4.D pull branch): page records in from the peer and stage them as
/// [`Buffer`] rows for the Store Engine collaborator to dequeue.
pub async fn pull_records<C: Connection, S: SyncStore>(
    connection: &C,
    store: &S,
    session: &mut TransferSession,
    chunk_size: u32,
) -> Result<()> {
    let records_total = session.records_total.unwrap_or(0);

    while session.records_transferred < records_total {
        let records = connection
            .pull_record_chunk(session.id, chunk_size, session.records_transferred)
            .await?;

        let buffers = records
            .into_iter()
            .map(|record| {
                let model_uuid = extract_model_uuid(&record)?;
                Ok(Buffer {
                    transfer_session_id: session.id,
                    model_uuid,
                    serialized: record,
                })
            })
            .collect::<Result<Vec<Buffer>>>()?;
        store.insert_buffers(&buffers).await?;

        session.records_transferred += chunk_size as i64;
        store.update_transfer_session(session).await?;
    }

    Ok(())
}

fn extract_model_uuid(record: &Value) -> Result<String> {
    record
        .get("model_uuid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ControllerError::SchemaValidation("record missing model_uuid field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_model_uuid_rejects_missing_field() {
        let record = serde_json::json!({ "serialized": "{}" });
        assert!(extract_model_uuid(&record).is_err());
    }

    #[test]
    fn extract_model_uuid_reads_string_field() {
        let record = serde_json::json!({ "model_uuid": "abc-123" });
        assert_eq!(extract_model_uuid(&record).unwrap(), "abc-123");
    }
}
