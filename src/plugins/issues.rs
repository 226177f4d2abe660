//! Issue record store: creation, edits, status/outcome lifecycle, tags and
//! comments.
//!
//! Invariants held here:
//! - `outcome` is set iff `status == closed`; leaving `closed` clears it.
//! - `execution_spec` is a JSON object without a `control_flow` key.
//! - Tags are trimmed, deduplicated and stored sorted.
//! - Timestamps come from the store clock, never from the caller.

use crate::core::db;
use crate::core::error::TissueError;
use crate::core::events;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::graph::{self, DepType};
use clap::ValueEnum;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Row, params, types::ToSql};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Outcome recorded when an issue was decomposed into children instead of
/// being completed directly.
pub const OUTCOME_EXPANDED: &str = "expanded";

const FORBIDDEN_SPEC_KEYS: &[&str] = &["control_flow"];

/// Max ids bound into a single `IN (...)` list.
const IN_CHUNK: usize = 500;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Paused,
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Paused => "paused",
            IssueStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Closed)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = TissueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "in_progress" => Ok(IssueStatus::InProgress),
            "paused" => Ok(IssueStatus::Paused),
            "closed" => Ok(IssueStatus::Closed),
            other => Err(TissueError::ValidationError(format!(
                "unknown status '{}' (expected open|in_progress|paused|closed)",
                other
            ))),
        }
    }
}

/// Free-form worker configuration. Always a JSON object, never carrying a
/// `control_flow` key: ordering lives in graph edges.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct ExecutionSpec(JsonMap<String, JsonValue>);

impl ExecutionSpec {
    pub fn from_value(value: JsonValue) -> Result<Self, TissueError> {
        match value {
            JsonValue::Null => Ok(Self::default()),
            JsonValue::Object(map) => {
                let spec = Self(map);
                spec.check()?;
                Ok(spec)
            }
            other => Err(TissueError::InvalidSpec(format!(
                "execution_spec must be an object, got {}",
                other
            ))),
        }
    }

    fn check(&self) -> Result<(), TissueError> {
        for key in FORBIDDEN_SPEC_KEYS {
            if self.0.contains_key(*key) {
                return Err(TissueError::InvalidSpec(format!(
                    "execution_spec.{} is not supported; express ordering with blocks/parent edges",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Overlay the top-level keys of `other`.
    pub fn merged(&self, other: &ExecutionSpec) -> ExecutionSpec {
        let mut map = self.0.clone();
        for (k, v) in &other.0 {
            map.insert(k.clone(), v.clone());
        }
        ExecutionSpec(map)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_json_string(&self) -> Result<String, TissueError> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub issue_id: String,
    pub author: String,
    pub body: String,
    pub created_at: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub body: String,
    pub status: IssueStatus,
    pub priority: i64,
    pub outcome: Option<String>,
    pub tags: Vec<String>,
    pub execution_spec: ExecutionSpec,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Issue {
    /// Tags starting with `prefix`, prefix stripped.
    pub fn tag_values<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags.iter().filter_map(move |t| t.strip_prefix(prefix))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub status: Option<IssueStatus>,
    pub outcome: Option<String>,
    pub priority: Option<i64>,
    pub tags: Vec<String>,
    pub execution_spec: Option<JsonValue>,
    /// Optional parent; the `parent` edge is written in the same transaction.
    pub parent: Option<String>,
}

impl NewIssue {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn spec(mut self, spec: JsonValue) -> Self {
        self.execution_spec = Some(spec);
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn status(mut self, status: IssueStatus, outcome: Option<&str>) -> Self {
        self.status = Some(status);
        self.outcome = outcome.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub priority: Option<i64>,
    /// Replaces the whole spec.
    pub execution_spec: Option<JsonValue>,
    /// Merged key by key over the (possibly replaced) spec.
    pub merge_spec: Option<JsonValue>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.priority.is_none()
            && self.execution_spec.is_none()
            && self.merge_spec.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<IssueStatus>,
    pub tag: Option<String>,
    pub root: Option<String>,
    pub limit: usize,
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s,]+$").expect("static tag regex"))
}

/// Trim, validate, dedupe and sort tags.
pub fn normalize_tags<I, S>(tags: I) -> Result<Vec<String>, TissueError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for raw in tags {
        let tag = raw.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if !tag_regex().is_match(tag) {
            return Err(TissueError::ValidationError(format!(
                "invalid tag '{}': tags may not contain whitespace or commas",
                tag
            )));
        }
        out.insert(tag.to_string());
    }
    Ok(out.into_iter().collect())
}

fn check_title(title: &str) -> Result<String, TissueError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TissueError::ValidationError(
            "title must not be empty".to_string(),
        ));
    }
    Ok(title.to_string())
}

fn check_priority(priority: i64) -> Result<i64, TissueError> {
    if !(1..=5).contains(&priority) {
        return Err(TissueError::ValidationError(format!(
            "priority must be within 1..=5, got {}",
            priority
        )));
    }
    Ok(priority)
}

/// Resolve the outcome column for a transition to `status`.
pub(crate) fn outcome_for(
    id: &str,
    status: IssueStatus,
    outcome: Option<&str>,
) -> Result<Option<String>, TissueError> {
    let outcome = outcome.map(str::trim).filter(|o| !o.is_empty());
    match (status.is_terminal(), outcome) {
        (true, Some(o)) => Ok(Some(o.to_string())),
        (true, None) => Err(TissueError::OutcomeRequired(id.to_string())),
        (false, Some(o)) => Err(TissueError::OutcomeOnNonTerminal {
            id: id.to_string(),
            status: status.to_string(),
            outcome: o.to_string(),
        }),
        (false, None) => Ok(None),
    }
}

pub(crate) const ISSUE_COLUMNS: &str =
    "id, title, body, status, priority, outcome, execution_spec, created_at, updated_at";

/// Same columns qualified with the `i` alias.
pub(crate) const ISSUE_COLUMNS_I: &str = "i.id, i.title, i.body, i.status, i.priority, i.outcome, i.execution_spec, i.created_at, i.updated_at";

pub(crate) fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let status: String = row.get(3)?;
    let spec: String = row.get(6)?;
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        status: status
            .parse()
            .map_err(|e: TissueError| db::corrupt_column(3, e.to_string()))?,
        priority: row.get(4)?,
        outcome: row.get(5)?,
        tags: Vec::new(),
        execution_spec: serde_json::from_str(&spec).map_err(|e| db::corrupt_column(6, e))?,
        comments: Vec::new(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub(crate) fn query_issues(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<Issue>, TissueError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, issue_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Tags for `ids`, batched into chunked `IN` lists.
pub(crate) fn load_tags(
    conn: &Connection,
    ids: &[&str],
) -> Result<FxHashMap<String, Vec<String>>, TissueError> {
    let mut tags: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT issue_id, tag FROM issue_tags WHERE issue_id IN ({}) ORDER BY issue_id, tag",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, tag) = row?;
            tags.entry(id).or_default().push(tag);
        }
    }
    Ok(tags)
}

fn load_comments(
    conn: &Connection,
    ids: &[&str],
) -> Result<FxHashMap<String, Vec<Comment>>, TissueError> {
    let mut comments: FxHashMap<String, Vec<Comment>> = FxHashMap::default();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT id, issue_id, author, body, created_at FROM issue_comments
             WHERE issue_id IN ({}) ORDER BY created_at, id",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
            Ok(Comment {
                id: row.get(0)?,
                issue_id: row.get(1)?,
                author: row.get(2)?,
                body: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        for row in rows {
            let c = row?;
            comments.entry(c.issue_id.clone()).or_default().push(c);
        }
    }
    Ok(comments)
}

/// Attach tags and comments to bare rows with one batched query each.
pub(crate) fn hydrate(conn: &Connection, mut issues: Vec<Issue>) -> Result<Vec<Issue>, TissueError> {
    if issues.is_empty() {
        return Ok(issues);
    }
    let ids: Vec<&str> = issues.iter().map(|i| i.id.as_str()).collect();
    let mut tags = load_tags(conn, &ids)?;
    let mut comments = load_comments(conn, &ids)?;
    for issue in issues.iter_mut() {
        issue.tags = tags.remove(&issue.id).unwrap_or_default();
        issue.comments = comments.remove(&issue.id).unwrap_or_default();
    }
    Ok(issues)
}

pub(crate) fn load_issue(conn: &Connection, id: &str) -> Result<Option<Issue>, TissueError> {
    let sql = format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS);
    let row = conn
        .query_row(&sql, params![id], issue_from_row)
        .optional()?;
    match row {
        Some(issue) => Ok(hydrate(conn, vec![issue])?.pop()),
        None => Ok(None),
    }
}

fn require_loaded(conn: &Connection, id: &str) -> Result<Issue, TissueError> {
    load_issue(conn, id)?.ok_or_else(|| TissueError::NotFound(format!("issue {}", id)))
}

fn insert_tags(conn: &Connection, id: &str, tags: &[String]) -> Result<(), TissueError> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO issue_tags(issue_id, tag) VALUES(?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![id, tag])?;
    }
    Ok(())
}

pub fn create_issue(store: &Store, new: &NewIssue) -> Result<Issue, TissueError> {
    let title = check_title(&new.title)?;
    let priority = check_priority(new.priority.unwrap_or(store.config.defaults.priority))?;
    let tags = normalize_tags(&new.tags)?;
    let spec = ExecutionSpec::from_value(new.execution_spec.clone().unwrap_or(JsonValue::Null))?;
    let spec_json = spec.to_json_string()?;
    let status = new.status.unwrap_or(IssueStatus::Open);
    let actor = store.config.defaults.author.clone();

    let issue = store.write("issues.create", |conn| {
        if let Some(parent) = new.parent.as_deref() {
            graph::require_issue(conn, parent)?;
        }
        let ts = time::next_tick(conn)?;
        let id = format!("is-{}", time::ulid_for_tick(ts));
        let outcome = outcome_for(&id, status, new.outcome.as_deref())?;

        conn.execute(
            "INSERT INTO issues(id, title, body, status, priority, outcome, execution_spec, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![id, title, new.body, status.as_str(), priority, outcome, spec_json, ts],
        )?;
        insert_tags(conn, &id, &tags)?;
        if let Some(parent) = new.parent.as_deref() {
            graph::upsert_edge(conn, parent, &id, DepType::Parent, ts)?;
        }
        events::record_event(
            conn,
            ts,
            "issue.create",
            Some(&id),
            &actor,
            serde_json::json!({
                "title": title,
                "status": status,
                "priority": priority,
                "tags": tags,
                "parent": new.parent,
            }),
        )?;
        require_loaded(conn, &id)
    })?;

    tracing::info!(id = %issue.id, title = %issue.title, "issue created");
    Ok(issue)
}

/// Fetch one issue with tags and comments.
pub fn get_issue(store: &Store, id: &str) -> Result<Option<Issue>, TissueError> {
    store.read("issues.get", |conn| load_issue(conn, id))
}

/// Like [`get_issue`] but a missing id is an error.
pub fn show_issue(store: &Store, id: &str) -> Result<Issue, TissueError> {
    store.read("issues.show", |conn| require_loaded(conn, id))
}

pub fn edit_issue(store: &Store, id: &str, patch: &IssuePatch) -> Result<Issue, TissueError> {
    let title = patch.title.as_deref().map(check_title).transpose()?;
    let priority = patch.priority.map(check_priority).transpose()?;
    let replace_spec = patch
        .execution_spec
        .clone()
        .map(ExecutionSpec::from_value)
        .transpose()?;
    let merge_spec = patch
        .merge_spec
        .clone()
        .map(ExecutionSpec::from_value)
        .transpose()?;
    let add_tags = normalize_tags(&patch.add_tags)?;
    let remove_tags = normalize_tags(&patch.remove_tags)?;
    let actor = store.config.defaults.author.clone();

    store.write("issues.edit", |conn| {
        let current = require_loaded(conn, id)?;
        if patch.is_empty() {
            return Ok(current);
        }
        let ts = time::next_tick(conn)?;

        let mut spec = replace_spec.clone().unwrap_or(current.execution_spec.clone());
        if let Some(overlay) = &merge_spec {
            spec = spec.merged(overlay);
        }
        spec.check()?;

        conn.execute(
            "UPDATE issues SET title = ?2, body = ?3, priority = ?4, execution_spec = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                id,
                title.as_deref().unwrap_or(&current.title),
                patch.body.as_deref().unwrap_or(&current.body),
                priority.unwrap_or(current.priority),
                spec.to_json_string()?,
                ts
            ],
        )?;
        insert_tags(conn, id, &add_tags)?;
        for tag in &remove_tags {
            conn.execute(
                "DELETE FROM issue_tags WHERE issue_id = ?1 AND tag = ?2",
                params![id, tag],
            )?;
        }
        events::record_event(
            conn,
            ts,
            "issue.edit",
            Some(id),
            &actor,
            serde_json::json!({
                "title": title,
                "body_changed": patch.body.is_some(),
                "priority": priority,
                "spec_changed": replace_spec.is_some() || merge_spec.is_some(),
                "add_tags": add_tags,
                "remove_tags": remove_tags,
            }),
        )?;
        require_loaded(conn, id)
    })
}

/// Move `id` to `status`. Closing requires an outcome; any other status
/// rejects one and clears whatever was stored.
pub fn set_status(
    store: &Store,
    id: &str,
    status: IssueStatus,
    outcome: Option<&str>,
) -> Result<Issue, TissueError> {
    let actor = store.config.defaults.author.clone();
    let issue = store.write("issues.set_status", |conn| {
        let current = require_loaded(conn, id)?;
        let new_outcome = outcome_for(id, status, outcome)?;
        let ts = time::next_tick(conn)?;
        conn.execute(
            "UPDATE issues SET status = ?2, outcome = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), new_outcome, ts],
        )?;
        events::record_event(
            conn,
            ts,
            "issue.status",
            Some(id),
            &actor,
            serde_json::json!({
                "from": current.status,
                "to": status,
                "outcome": new_outcome,
            }),
        )?;
        require_loaded(conn, id)
    })?;
    tracing::info!(id, status = %issue.status, outcome = ?issue.outcome, "status changed");
    Ok(issue)
}

pub fn close_issue(store: &Store, id: &str, outcome: &str) -> Result<Issue, TissueError> {
    set_status(store, id, IssueStatus::Closed, Some(outcome))
}

pub fn reopen_issue(store: &Store, id: &str) -> Result<Issue, TissueError> {
    set_status(store, id, IssueStatus::Open, None)
}

pub fn list_issues(store: &Store, filter: &ListFilter) -> Result<Vec<Issue>, TissueError> {
    store.read("issues.list", |conn| {
        let mut query = String::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(root) = &filter.root {
            if !graph::issue_exists(conn, root)? {
                return Err(TissueError::UnknownIssue(root.clone()));
            }
            query.push_str(schemas::SUBTREE_CTE);
            params.push(Box::new(root.clone()));
        }
        query.push_str(&format!("SELECT {} FROM issues i WHERE 1=1", ISSUE_COLUMNS_I));
        if filter.root.is_some() {
            query.push_str(" AND i.id IN (SELECT id FROM subtree)");
        }
        if let Some(status) = filter.status {
            params.push(Box::new(status.as_str()));
            query.push_str(&format!(" AND i.status = ?{}", params.len()));
        }
        if let Some(tag) = &filter.tag {
            params.push(Box::new(tag.trim().to_string()));
            query.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM issue_tags t WHERE t.issue_id = i.id AND t.tag = ?{})",
                params.len()
            ));
        }
        params.push(Box::new(limit_param(filter.limit)));
        query.push_str(&format!(
            " ORDER BY i.created_at ASC, i.id ASC LIMIT ?{}",
            params.len()
        ));

        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = query_issues(conn, &query, &params_as_dyn)?;
        hydrate(conn, rows)
    })
}

pub(crate) fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub fn add_comment(
    store: &Store,
    id: &str,
    body: &str,
    author: Option<&str>,
) -> Result<Comment, TissueError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(TissueError::ValidationError(
            "comment body must not be empty".to_string(),
        ));
    }
    let author = author
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(&store.config.defaults.author)
        .to_string();

    store.write("issues.comment", |conn| {
        graph::require_issue(conn, id)?;
        let ts = time::next_tick(conn)?;
        let comment = Comment {
            id: format!("cm-{}", time::ulid_for_tick(ts)),
            issue_id: id.to_string(),
            author: author.clone(),
            body: body.to_string(),
            created_at: ts,
        };
        conn.execute(
            "INSERT INTO issue_comments(id, issue_id, author, body, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![comment.id, comment.issue_id, comment.author, comment.body, ts],
        )?;
        conn.execute(
            "UPDATE issues SET updated_at = ?2 WHERE id = ?1",
            params![id, ts],
        )?;
        events::record_event(
            conn,
            ts,
            "issue.comment",
            Some(id),
            &author,
            serde_json::json!({ "comment_id": comment.id }),
        )?;
        Ok(comment)
    })
}
