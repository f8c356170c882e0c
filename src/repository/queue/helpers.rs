//! Row conversion for the queue repository.

use std::path::PathBuf;

use crate::models::{ItemState, Priority, QueueItem};
use crate::repository::{parse_datetime, parse_datetime_opt};

pub(super) fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get("id")?,
        source_path: PathBuf::from(row.get::<_, String>("source_path")?),
        origin_path: row
            .get::<_, Option<String>>("origin_path")?
            .map(PathBuf::from),
        fingerprint: row.get("fingerprint")?,
        priority: Priority::from_i32(row.get::<_, i32>("priority")?)
            .unwrap_or(Priority::Normal),
        state: ItemState::from_str(&row.get::<_, String>("state")?)
            .unwrap_or(ItemState::Pending),
        attempt_count: row.get::<_, i32>("attempt_count")? as u32,
        enqueued_at: parse_datetime(&row.get::<_, String>("enqueued_at")?),
        last_attempt_at: parse_datetime_opt(row.get("last_attempt_at")?),
        next_retry_at: parse_datetime_opt(row.get("next_retry_at")?),
        claim_token: row.get("claim_token")?,
        claimed_by: row.get("claimed_by")?,
        error_message: row.get("error_message")?,
        completed_at: parse_datetime_opt(row.get("completed_at")?),
    })
}
