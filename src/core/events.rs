//! Mutation audit trail.
//!
//! Every write appends one row to `issue_events` inside the same transaction
//! as the mutation it describes, so the log never disagrees with the tables.

use crate::core::db;
use crate::core::error::TissueError;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IssueEvent {
    pub event_id: String,
    pub ts: i64,
    pub event_type: String,
    pub issue_id: Option<String>,
    pub actor: String,
    pub payload: JsonValue,
}

pub fn record_event(
    conn: &Connection,
    ts: i64,
    event_type: &str,
    issue_id: Option<&str>,
    actor: &str,
    payload: JsonValue,
) -> Result<(), TissueError> {
    conn.execute(
        "INSERT INTO issue_events(event_id, ts, event_type, issue_id, actor, payload)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            time::new_event_id(),
            ts,
            event_type,
            issue_id,
            actor,
            serde_json::to_string(&payload)?
        ],
    )?;
    Ok(())
}

/// Events touching `issue_id`, oldest first.
pub fn history(store: &Store, issue_id: &str) -> Result<Vec<IssueEvent>, TissueError> {
    store.read("events.history", |conn| {
        let mut stmt = conn.prepare(
            "SELECT event_id, ts, event_type, issue_id, actor, payload
             FROM issue_events WHERE issue_id = ?1 ORDER BY ts ASC, event_id ASC",
        )?;
        let rows = stmt.query_map(params![issue_id], |row| {
            let payload: String = row.get(5)?;
            Ok(IssueEvent {
                event_id: row.get(0)?,
                ts: row.get(1)?,
                event_type: row.get(2)?,
                issue_id: row.get(3)?,
                actor: row.get(4)?,
                payload: serde_json::from_str(&payload).map_err(|e| db::corrupt_column(5, e))?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
}
