//! Database schema definitions for the issue store.
//!
//! A single SQLite database holds the whole graph:
//! - `issues`: one row per work item, status/outcome lifecycle.
//! - `issue_tags`: tag set per issue (dedup by primary key).
//! - `issue_deps`: `parent`/`blocks` edges, soft-deleted through `active`.
//! - `issue_comments`: append-only comment log.
//! - `issue_events`: audit trail of every mutation.
//! - `meta`: schema version and the store clock.

pub const TISSUE_DIR_NAME: &str = ".tissue";
pub const TISSUE_DB_NAME: &str = "tissue.db";
pub const TISSUE_CONFIG_NAME: &str = "config.toml";
pub const TISSUE_SCHEMA_VERSION: u32 = 1;

pub const TISSUE_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const TISSUE_DB_SCHEMA_ISSUES: &str = "
    CREATE TABLE IF NOT EXISTS issues (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'open',
        priority INTEGER NOT NULL DEFAULT 3,
        outcome TEXT,
        execution_spec TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (status IN ('open', 'in_progress', 'paused', 'closed')),
        CHECK ((status = 'closed') = (outcome IS NOT NULL))
    )
";
pub const TISSUE_DB_SCHEMA_INDEX_ISSUES_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status, priority, created_at)";

pub const TISSUE_DB_SCHEMA_TAGS: &str = "
    CREATE TABLE IF NOT EXISTS issue_tags (
        issue_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (issue_id, tag),
        FOREIGN KEY(issue_id) REFERENCES issues(id)
    )
";
pub const TISSUE_DB_SCHEMA_INDEX_TAGS_TAG: &str =
    "CREATE INDEX IF NOT EXISTS idx_issue_tags_tag ON issue_tags(tag)";

pub const TISSUE_DB_SCHEMA_DEPS: &str = "
    CREATE TABLE IF NOT EXISTS issue_deps (
        src_id TEXT NOT NULL,
        dst_id TEXT NOT NULL,
        dep_type TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (src_id, dst_id, dep_type),
        CHECK (dep_type IN ('parent', 'blocks')),
        FOREIGN KEY(src_id) REFERENCES issues(id),
        FOREIGN KEY(dst_id) REFERENCES issues(id)
    )
";
pub const TISSUE_DB_SCHEMA_INDEX_DEPS_SRC_ACTIVE: &str = "CREATE INDEX IF NOT EXISTS idx_issue_deps_src_active ON issue_deps(src_id, dep_type) WHERE active = 1";
pub const TISSUE_DB_SCHEMA_INDEX_DEPS_DST_ACTIVE: &str = "CREATE INDEX IF NOT EXISTS idx_issue_deps_dst_active ON issue_deps(dst_id, dep_type) WHERE active = 1";

pub const TISSUE_DB_SCHEMA_COMMENTS: &str = "
    CREATE TABLE IF NOT EXISTS issue_comments (
        id TEXT PRIMARY KEY,
        issue_id TEXT NOT NULL,
        author TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY(issue_id) REFERENCES issues(id)
    )
";
pub const TISSUE_DB_SCHEMA_INDEX_COMMENTS_ISSUE: &str =
    "CREATE INDEX IF NOT EXISTS idx_issue_comments_issue ON issue_comments(issue_id, created_at)";

pub const TISSUE_DB_SCHEMA_EVENTS: &str = "
    CREATE TABLE IF NOT EXISTS issue_events (
        event_id TEXT PRIMARY KEY,
        ts INTEGER NOT NULL,
        event_type TEXT NOT NULL,
        issue_id TEXT,
        actor TEXT NOT NULL,
        payload TEXT NOT NULL
    )
";
pub const TISSUE_DB_SCHEMA_INDEX_EVENTS_ISSUE: &str =
    "CREATE INDEX IF NOT EXISTS idx_issue_events_issue ON issue_events(issue_id, ts)";

/// Active `parent` descendants of `?1`, inclusive. `UNION` keeps cyclic data finite.
pub const SUBTREE_CTE: &str = "
    WITH RECURSIVE subtree(id) AS (
        SELECT ?1
        UNION
        SELECT d.dst_id FROM issue_deps d
        JOIN subtree s ON d.src_id = s.id
        WHERE d.dep_type = 'parent' AND d.active = 1
    )
";
