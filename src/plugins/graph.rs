//! Dependency graph over issues: `parent` decomposition edges and `blocks`
//! ordering edges.
//!
//! Edges are never deleted. `remove_dep` flips `active` to 0 and every query
//! here filters on the active partial indexes. Graph construction is
//! permissive: a `parent` edge that closes a cycle is still written, a warning
//! is logged and an `edge.cycle_suspected` event is recorded. The structural
//! validator recomputes cycles from the live edge set and stays authoritative.

use crate::core::error::TissueError;
use crate::core::events;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::ValueEnum;
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    /// `src` decomposes into `dst`; `dst` is a child of `src`.
    Parent,
    /// `src` must be closed before `dst` may run.
    Blocks,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Parent => "parent",
            DepType::Blocks => "blocks",
        }
    }
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepType {
    type Err = TissueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(DepType::Parent),
            "blocks" => Ok(DepType::Blocks),
            other => Err(TissueError::ValidationError(format!(
                "unknown dependency type '{}' (expected parent|blocks)",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DepEdge {
    pub src_id: String,
    pub dst_id: String,
    pub dep_type: DepType,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DepReceipt {
    pub ok: bool,
    pub src_id: String,
    pub dst_id: String,
    pub dep_type: DepType,
    /// False when the edge was already in the requested state.
    pub changed: bool,
    #[serde(default)]
    pub cycle_suspected: bool,
}

pub(crate) fn issue_exists(conn: &Connection, id: &str) -> Result<bool, TissueError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM issues WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn require_issue(conn: &Connection, id: &str) -> Result<(), TissueError> {
    if issue_exists(conn, id)? {
        Ok(())
    } else {
        Err(TissueError::NotFound(format!("issue {}", id)))
    }
}

/// True when `to` is reachable from `from` over active `parent` edges
/// (`from` itself counts).
pub(crate) fn parent_reachable(conn: &Connection, from: &str, to: &str) -> Result<bool, TissueError> {
    let sql = format!(
        "{} SELECT 1 FROM subtree WHERE id = ?2 LIMIT 1",
        schemas::SUBTREE_CTE
    );
    let hit: Option<i64> = conn
        .query_row(&sql, params![from, to], |row| row.get(0))
        .optional()?;
    Ok(hit.is_some())
}

/// Insert or re-activate an edge. Returns whether the row changed state.
pub(crate) fn upsert_edge(
    conn: &Connection,
    src: &str,
    dst: &str,
    dep_type: DepType,
    ts: i64,
) -> Result<bool, TissueError> {
    let was_active: Option<bool> = conn
        .query_row(
            "SELECT active FROM issue_deps WHERE src_id = ?1 AND dst_id = ?2 AND dep_type = ?3",
            params![src, dst, dep_type.as_str()],
            |row| row.get::<_, i64>(0).map(|v| v != 0),
        )
        .optional()?;
    match was_active {
        Some(true) => Ok(false),
        Some(false) => {
            conn.execute(
                "UPDATE issue_deps SET active = 1, updated_at = ?4
                 WHERE src_id = ?1 AND dst_id = ?2 AND dep_type = ?3",
                params![src, dst, dep_type.as_str(), ts],
            )?;
            Ok(true)
        }
        None => {
            conn.execute(
                "INSERT INTO issue_deps(src_id, dst_id, dep_type, active, created_at, updated_at)
                 VALUES(?1, ?2, ?3, 1, ?4, ?4)",
                params![src, dst, dep_type.as_str(), ts],
            )?;
            Ok(true)
        }
    }
}

pub fn add_dep(store: &Store, src: &str, dst: &str, dep_type: DepType) -> Result<DepReceipt, TissueError> {
    let actor = store.config.defaults.author.clone();
    store.write("graph.add_dep", |conn| {
        require_issue(conn, src)?;
        require_issue(conn, dst)?;

        let cycle_suspected = dep_type == DepType::Parent && parent_reachable(conn, dst, src)?;
        let ts = time::next_tick(conn)?;
        let changed = upsert_edge(conn, src, dst, dep_type, ts)?;
        if changed {
            conn.execute(
                "UPDATE issues SET updated_at = ?2 WHERE id = ?1",
                params![dst, ts],
            )?;
            events::record_event(
                conn,
                ts,
                "edge.add",
                Some(dst),
                &actor,
                serde_json::json!({ "src_id": src, "dst_id": dst, "dep_type": dep_type }),
            )?;
        }
        if changed && cycle_suspected {
            tracing::warn!(src, dst, "parent edge closes a cycle; recorded for validation");
            events::record_event(
                conn,
                ts,
                "edge.cycle_suspected",
                Some(src),
                &actor,
                serde_json::json!({ "src_id": src, "dst_id": dst }),
            )?;
        }

        Ok(DepReceipt {
            ok: true,
            src_id: src.to_string(),
            dst_id: dst.to_string(),
            dep_type,
            changed,
            cycle_suspected,
        })
    })
}

pub fn remove_dep(store: &Store, src: &str, dst: &str, dep_type: DepType) -> Result<DepReceipt, TissueError> {
    let actor = store.config.defaults.author.clone();
    store.write("graph.remove_dep", |conn| {
        require_issue(conn, src)?;
        require_issue(conn, dst)?;

        let active: Option<bool> = conn
            .query_row(
                "SELECT active FROM issue_deps WHERE src_id = ?1 AND dst_id = ?2 AND dep_type = ?3",
                params![src, dst, dep_type.as_str()],
                |row| row.get::<_, i64>(0).map(|v| v != 0),
            )
            .optional()?;
        let Some(active) = active else {
            return Err(TissueError::NotFound(format!(
                "edge {} -{}-> {}",
                src, dep_type, dst
            )));
        };

        if active {
            let ts = time::next_tick(conn)?;
            conn.execute(
                "UPDATE issue_deps SET active = 0, updated_at = ?4
                 WHERE src_id = ?1 AND dst_id = ?2 AND dep_type = ?3",
                params![src, dst, dep_type.as_str(), ts],
            )?;
            conn.execute(
                "UPDATE issues SET updated_at = ?2 WHERE id = ?1",
                params![dst, ts],
            )?;
            events::record_event(
                conn,
                ts,
                "edge.remove",
                Some(dst),
                &actor,
                serde_json::json!({ "src_id": src, "dst_id": dst, "dep_type": dep_type }),
            )?;
        }

        Ok(DepReceipt {
            ok: true,
            src_id: src.to_string(),
            dst_id: dst.to_string(),
            dep_type,
            changed: active,
            cycle_suspected: false,
        })
    })
}

fn neighbour_ids(conn: &Connection, sql: &str, id: &str) -> Result<Vec<String>, TissueError> {
    require_issue(conn, id)?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Active children of `id`, oldest first.
pub fn children_of(store: &Store, id: &str) -> Result<Vec<String>, TissueError> {
    store.read("graph.children_of", |conn| {
        neighbour_ids(
            conn,
            "SELECT dst_id FROM issue_deps
             WHERE src_id = ?1 AND dep_type = 'parent' AND active = 1 ORDER BY dst_id",
            id,
        )
    })
}

/// Active immediate parents of `id`, oldest first.
pub fn parents_of(store: &Store, id: &str) -> Result<Vec<String>, TissueError> {
    store.read("graph.parents_of", |conn| {
        neighbour_ids(
            conn,
            "SELECT src_id FROM issue_deps
             WHERE dst_id = ?1 AND dep_type = 'parent' AND active = 1 ORDER BY src_id",
            id,
        )
    })
}

/// Sources of active `blocks` edges pointing at `id`, whatever their status.
pub fn blockers_of(store: &Store, id: &str) -> Result<Vec<String>, TissueError> {
    store.read("graph.blockers_of", |conn| {
        neighbour_ids(
            conn,
            "SELECT src_id FROM issue_deps
             WHERE dst_id = ?1 AND dep_type = 'blocks' AND active = 1 ORDER BY src_id",
            id,
        )
    })
}

/// Targets of active `blocks` edges leaving `id`.
pub fn blocking(store: &Store, id: &str) -> Result<Vec<String>, TissueError> {
    store.read("graph.blocking", |conn| {
        neighbour_ids(
            conn,
            "SELECT dst_id FROM issue_deps
             WHERE src_id = ?1 AND dep_type = 'blocks' AND active = 1 ORDER BY dst_id",
            id,
        )
    })
}

/// Every edge touching `id`, active or not.
pub fn deps_of(store: &Store, id: &str) -> Result<Vec<DepEdge>, TissueError> {
    store.read("graph.deps_of", |conn| {
        require_issue(conn, id)?;
        let mut stmt = conn.prepare(
            "SELECT src_id, dst_id, dep_type, active, created_at, updated_at FROM issue_deps
             WHERE src_id = ?1 OR dst_id = ?1 ORDER BY created_at, src_id, dst_id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (src_id, dst_id, dep_type, active, created_at, updated_at) = row?;
            out.push(DepEdge {
                src_id,
                dst_id,
                dep_type: dep_type.parse()?,
                active: active != 0,
                created_at,
                updated_at,
            });
        }
        Ok(out)
    })
}

/// Ancestors of `id`, nearest first.
pub fn ancestors_of(store: &Store, id: &str) -> Result<Vec<String>, TissueError> {
    store.read("graph.ancestors_of", |conn| {
        require_issue(conn, id)?;
        let lineage = load_parent_map_upward(conn, id)?;
        Ok(bfs_ancestors(id, |n| {
            lineage.get(n).map(Vec::as_slice).unwrap_or(&[])
        }))
    })
}

/// Active parent edges among `id` and all of its ancestors, as child -> parents.
/// One query regardless of depth.
pub(crate) fn load_parent_map_upward(
    conn: &Connection,
    id: &str,
) -> Result<FxHashMap<String, Vec<String>>, TissueError> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE up(id) AS (
             SELECT ?1
             UNION
             SELECT d.src_id FROM issue_deps d
             JOIN up u ON d.dst_id = u.id
             WHERE d.dep_type = 'parent' AND d.active = 1
         )
         SELECT src_id, dst_id FROM issue_deps
         WHERE dep_type = 'parent' AND active = 1 AND dst_id IN (SELECT id FROM up)
         ORDER BY dst_id, src_id",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut parents: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for row in rows {
        let (src, dst) = row?;
        parents.entry(dst).or_default().push(src);
    }
    Ok(parents)
}

/// Breadth-first walk up `parents_of`, nearest first. Parents at equal depth
/// are visited in the order `parents_of` returns them; each ancestor appears
/// once and `id` itself is never included.
pub fn bfs_ancestors<'a, F>(id: &str, parents_of: F) -> Vec<String>
where
    F: Fn(&str) -> &'a [String],
{
    bfs_ancestors_with_depth(id, parents_of)
        .into_iter()
        .map(|(ancestor, _)| ancestor)
        .collect()
}

/// Same walk as [`bfs_ancestors`], paired with the hop count from `id`.
pub fn bfs_ancestors_with_depth<'a, F>(id: &str, parents_of: F) -> Vec<(String, u32)>
where
    F: Fn(&str) -> &'a [String],
{
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    seen.insert(id);
    let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
    queue.push_back((id, 0));
    let mut out = Vec::new();
    while let Some((node, depth)) = queue.pop_front() {
        for parent in parents_of(node) {
            if seen.insert(parent.as_str()) {
                out.push((parent.clone(), depth + 1));
                queue.push_back((parent.as_str(), depth + 1));
            }
        }
    }
    out
}
