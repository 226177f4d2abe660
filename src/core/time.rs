//! Store clock and identifier helpers.
//!
//! Timestamps are unix-epoch microseconds advanced through `meta.clock`, so
//! every tick handed out by one store is strictly greater than the last one,
//! regardless of wall-clock skew or how many processes share the database.

use crate::core::error::TissueError;
use rusqlite::{Connection, OptionalExtension};
use ulid::Ulid;

pub fn wall_clock_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Next clock value: `max(now, last + 1)`. Must run inside a write transaction.
pub fn next_tick(conn: &Connection) -> Result<i64, TissueError> {
    let last: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'clock'", [], |row| {
            row.get(0)
        })
        .optional()?;
    let last = last.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
    let tick = advance(last, wall_clock_micros());
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('clock', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [tick.to_string()],
    )?;
    Ok(tick)
}

fn advance(last: i64, now: i64) -> i64 {
    if now > last { now } else { last + 1 }
}

/// ULID whose lexicographic order follows `tick`. The millisecond part goes in
/// the timestamp field and the sub-millisecond micros in the top random bits.
pub fn ulid_for_tick(tick: i64) -> Ulid {
    let micros = tick.max(0) as u64;
    let ms = micros / 1_000;
    let sub_ms = u128::from(micros % 1_000);
    let noise = Ulid::new().random() & ((1u128 << 70) - 1);
    Ulid::from_parts(ms, (sub_ms << 70) | noise)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}
