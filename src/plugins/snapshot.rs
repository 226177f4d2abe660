//! In-memory view of one subtree, loaded with a fixed number of queries on a
//! single read connection.
//!
//! The scope covers the subtree rooted at `root_id`, both endpoints of every
//! active `blocks` edge touching it, and all ancestors of those nodes, so
//! sibling checks and team inheritance never go back to the database.

use crate::core::error::TissueError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::plugins::graph;
use crate::plugins::issues::{self, Issue};
use rusqlite::{Connection, params};
use rustc_hash::FxHashMap;

const SCOPE_CTES: &str = ",
    seeds(id) AS (
        SELECT id FROM subtree
        UNION
        SELECT b.src_id FROM issue_deps b
        WHERE b.dep_type = 'blocks' AND b.active = 1 AND b.dst_id IN (SELECT id FROM subtree)
        UNION
        SELECT b.dst_id FROM issue_deps b
        WHERE b.dep_type = 'blocks' AND b.active = 1 AND b.src_id IN (SELECT id FROM subtree)
    ),
    scope(id) AS (
        SELECT id FROM seeds
        UNION
        SELECT d.src_id FROM issue_deps d
        JOIN scope s ON d.dst_id = s.id
        WHERE d.dep_type = 'parent' AND d.active = 1
    )
";

#[derive(Debug, Clone, Default)]
pub struct SubtreeSnapshot {
    pub root_id: String,
    /// Subtree members, root included, sorted by id.
    pub members: Vec<String>,
    /// Every issue in scope, tags hydrated, comments left empty.
    pub issues: FxHashMap<String, Issue>,
    /// Active parent edges in scope, parent -> children, sorted.
    pub children: FxHashMap<String, Vec<String>>,
    /// Active parent edges in scope, child -> parents, sorted.
    pub parents: FxHashMap<String, Vec<String>>,
    /// Active `blocks` edges with at least one endpoint in the subtree.
    pub blocks: Vec<(String, String)>,
}

impl SubtreeSnapshot {
    pub fn load(store: &Store, root_id: &str) -> Result<Self, TissueError> {
        store.read("snapshot.load", |conn| Self::load_with(conn, root_id))
    }

    pub(crate) fn load_with(conn: &Connection, root_id: &str) -> Result<Self, TissueError> {
        if !graph::issue_exists(conn, root_id)? {
            return Err(TissueError::UnknownIssue(root_id.to_string()));
        }
        let members = string_rows(
            conn,
            &format!("{} SELECT id FROM subtree ORDER BY id", schemas::SUBTREE_CTE),
            root_id,
        )?;
        let blocks = pair_rows(
            conn,
            &format!(
                "{} SELECT src_id, dst_id FROM issue_deps
                 WHERE dep_type = 'blocks' AND active = 1
                   AND (src_id IN (SELECT id FROM subtree) OR dst_id IN (SELECT id FROM subtree))
                 ORDER BY src_id, dst_id",
                schemas::SUBTREE_CTE
            ),
            root_id,
        )?;

        let scope_prefix = format!("{}{}", schemas::SUBTREE_CTE, SCOPE_CTES);
        let bare = {
            let sql = format!(
                "{} SELECT {} FROM issues i WHERE i.id IN (SELECT id FROM scope)",
                scope_prefix,
                issues::ISSUE_COLUMNS_I
            );
            issues::query_issues(conn, &sql, &[&root_id])?
        };
        let tag_rows = pair_rows(
            conn,
            &format!(
                "{} SELECT issue_id, tag FROM issue_tags
                 WHERE issue_id IN (SELECT id FROM scope) ORDER BY issue_id, tag",
                scope_prefix
            ),
            root_id,
        )?;
        let edges = pair_rows(
            conn,
            &format!(
                "{} SELECT src_id, dst_id FROM issue_deps
                 WHERE dep_type = 'parent' AND active = 1 AND dst_id IN (SELECT id FROM scope)
                 ORDER BY src_id, dst_id",
                scope_prefix
            ),
            root_id,
        )?;

        let mut tags: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for (id, tag) in tag_rows {
            tags.entry(id).or_default().push(tag);
        }
        let issues = bare
            .into_iter()
            .map(|mut issue| {
                issue.tags = tags.remove(&issue.id).unwrap_or_default();
                (issue.id.clone(), issue)
            })
            .collect();

        let snapshot = Self::from_parts(root_id, members, issues, edges, blocks);
        tracing::debug!(
            root = root_id,
            members = snapshot.members.len(),
            scope = snapshot.issues.len(),
            "subtree snapshot"
        );
        Ok(snapshot)
    }

    /// Assemble a snapshot from rows; `parent_edges` are `(src, dst)` pairs.
    pub fn from_parts(
        root_id: &str,
        mut members: Vec<String>,
        issues: FxHashMap<String, Issue>,
        parent_edges: Vec<(String, String)>,
        blocks: Vec<(String, String)>,
    ) -> Self {
        members.sort();
        members.dedup();
        let mut children: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut parents: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for (src, dst) in parent_edges {
            children.entry(src.clone()).or_default().push(dst.clone());
            parents.entry(dst).or_default().push(src);
        }
        for list in children.values_mut().chain(parents.values_mut()) {
            list.sort();
            list.dedup();
        }
        Self {
            root_id: root_id.to_string(),
            members,
            issues,
            children,
            parents,
            blocks,
        }
    }

    pub fn issue(&self, id: &str) -> Option<&Issue> {
        self.issues.get(id)
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents_of(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tags_of(&self, id: &str) -> &[String] {
        self.issues.get(id).map(|i| i.tags.as_slice()).unwrap_or(&[])
    }
}

fn string_rows(conn: &Connection, sql: &str, root_id: &str) -> Result<Vec<String>, TissueError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![root_id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn pair_rows(
    conn: &Connection,
    sql: &str,
    root_id: &str,
) -> Result<Vec<(String, String)>, TissueError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![root_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
