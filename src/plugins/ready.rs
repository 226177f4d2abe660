//! Ready-work queries.
//!
//! An issue is ready when it is `open`, has no active `parent` children (it
//! is a leaf) and every active `blocks` edge into it comes from a closed
//! issue. The predicate is evaluated in SQL so a large blocked backlog never
//! crowds a ready leaf out of a limited page.

use crate::core::error::TissueError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::plugins::graph;
use crate::plugins::issues::{self, Issue};
use rusqlite::types::ToSql;

/// Readiness over alias `i`. Shared with the claim's conditional update.
pub(crate) const READY_PREDICATE: &str = "
    i.status = 'open'
    AND NOT EXISTS (
        SELECT 1 FROM issue_deps c
        WHERE c.src_id = i.id AND c.dep_type = 'parent' AND c.active = 1
    )
    AND NOT EXISTS (
        SELECT 1 FROM issue_deps b
        JOIN issues bi ON bi.id = b.src_id
        WHERE b.dst_id = i.id AND b.dep_type = 'blocks' AND b.active = 1
          AND bi.status != 'closed'
    )";

#[derive(Debug, Clone, Default)]
pub struct ReadyQuery {
    pub limit: usize,
    /// Restrict to the parent-subtree of this issue (inclusive).
    pub root: Option<String>,
    /// Every tag listed must be present.
    pub tags: Vec<String>,
}

impl ReadyQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Ready leaves ordered by priority (1 first), then creation time.
pub fn ready(store: &Store, query: &ReadyQuery) -> Result<Vec<Issue>, TissueError> {
    let tags = issues::normalize_tags(&query.tags)?;
    store.read("ready.list", |conn| {
        let mut sql = String::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(root) = &query.root {
            if !graph::issue_exists(conn, root)? {
                return Err(TissueError::UnknownIssue(root.clone()));
            }
            sql.push_str(schemas::SUBTREE_CTE);
            params.push(Box::new(root.clone()));
        }
        sql.push_str(&format!(
            "SELECT {} FROM issues i WHERE {}",
            issues::ISSUE_COLUMNS_I,
            READY_PREDICATE
        ));
        if query.root.is_some() {
            sql.push_str(" AND i.id IN (SELECT id FROM subtree)");
        }
        for tag in &tags {
            params.push(Box::new(tag.clone()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM issue_tags t WHERE t.issue_id = i.id AND t.tag = ?{})",
                params.len()
            ));
        }
        params.push(Box::new(issues::limit_param(query.limit)));
        sql.push_str(&format!(
            " ORDER BY i.priority ASC, i.created_at ASC, i.id ASC LIMIT ?{}",
            params.len()
        ));

        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = issues::query_issues(conn, &sql, &params_as_dyn)?;
        tracing::debug!(count = rows.len(), limit = query.limit, "ready leaves");
        issues::hydrate(conn, rows)
    })
}
