//! Atomic claim of ready leaves and the resumable (in-progress) queue.

use crate::core::error::TissueError;
use crate::core::events;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::graph;
use crate::plugins::issues::{self, Issue};
use crate::plugins::ready::READY_PREDICATE;
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct ClaimResult {
    pub claimed: bool,
    pub claimed_at: Option<i64>,
    /// State of the issue after the attempt.
    pub issue: Issue,
}

/// Move `id` from ready to `in_progress`.
///
/// The readiness check and the status flip are one conditional `UPDATE`
/// under the store's write lock, so among concurrent callers at most one
/// sees `claimed: true`. A non-ready issue yields `claimed: false` and is
/// left unchanged.
pub fn claim_ready_leaf(store: &Store, id: &str) -> Result<ClaimResult, TissueError> {
    let actor = store.config.defaults.author.clone();
    let result = store.write("claim.ready_leaf", |conn| {
        graph::require_issue(conn, id)?;
        let ts = time::next_tick(conn)?;
        let sql = format!(
            "UPDATE issues SET status = 'in_progress', updated_at = ?1
             WHERE id = ?2 AND id IN (SELECT i.id FROM issues i WHERE i.id = ?2 AND {})",
            READY_PREDICATE
        );
        let changed = conn.execute(&sql, params![ts, id])?;
        let claimed = changed == 1;
        if claimed {
            events::record_event(
                conn,
                ts,
                "issue.claim",
                Some(id),
                &actor,
                serde_json::json!({ "from": "open", "to": "in_progress" }),
            )?;
        }
        let issue = issues::load_issue(conn, id)?
            .ok_or_else(|| TissueError::NotFound(format!("issue {}", id)))?;
        Ok(ClaimResult {
            claimed,
            claimed_at: claimed.then_some(ts),
            issue,
        })
    })?;
    if result.claimed {
        tracing::info!(id, "claimed");
    } else {
        tracing::debug!(id, status = %result.issue.status, "claim lost or not ready");
    }
    Ok(result)
}

/// Issues already `in_progress`, oldest first, for workers picking up after a
/// restart.
pub fn resumable(store: &Store, limit: usize) -> Result<Vec<Issue>, TissueError> {
    store.read("claim.resumable", |conn| {
        let sql = format!(
            "SELECT {} FROM issues WHERE status = 'in_progress'
             ORDER BY created_at ASC, id ASC LIMIT ?1",
            issues::ISSUE_COLUMNS
        );
        let rows = issues::query_issues(conn, &sql, &[&issues::limit_param(limit)])?;
        issues::hydrate(conn, rows)
    })
}
