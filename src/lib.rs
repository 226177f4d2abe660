//! Tissue: the issue dependency graph and readiness engine.
//!
//! Work items ("issues") are nodes in a persisted graph with two edge kinds:
//! `parent` (decomposition) and `blocks` (sibling ordering). Worker loops use
//! the engine to find ready leaves, claim exactly one of them, resolve which
//! team owns it, and certify that a subtree is structurally sound before
//! treating its root as done.
//!
//! # Architecture
//!
//! - One SQLite database per store (`.tissue/tissue.db`), reached only
//!   through [`core::store::Store`] and its pooled read/write transactions.
//! - Every mutation takes a strictly increasing tick from the store clock and
//!   appends an audit row to `issue_events`.
//! - Readiness and claims share one SQL predicate; validation and bulk team
//!   resolution run over a single [`plugins::snapshot::SubtreeSnapshot`].
//!
//! # Examples
//!
//! ```bash
//! tissue init
//! tissue create "Ship the parser" -t team:platform
//! tissue create "Write tokenizer" --parent is-01J...
//! tissue ready --limit 5
//! tissue claim is-01J...
//! tissue close is-01J... --outcome success
//! tissue validate-subtree is-01J...
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store, pool, schema, clock, config, errors, audit events
//! - [`plugins`]: engine subsystems (issues, graph, ready, claim, team, validate)

pub mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{Cli, Command, OutputFormat};
use crate::core::{config::Config, error::TissueError, events, schemas, store::Store};
use crate::plugins::issues::{self, Issue, IssuePatch, IssueStatus, ListFilter, NewIssue};
use crate::plugins::{claim, graph, ready, team, validate};
use clap::Parser;
use colored::Colorize;
use serde_json::{Value as JsonValue, json};
use std::fs;
use std::path::Path;

/// Parse the command line, run one command and print its result.
pub fn run() -> Result<(), TissueError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let data_dir = Store::discover(&cwd);

    if let Command::Init = cli.command {
        let out = init_store(&data_dir)?;
        return emit(cli.format, &cli.command, &out);
    }

    if !data_dir.is_dir() {
        return Err(TissueError::NotFound(format!(
            "no tissue store at {} (run `tissue init`)",
            data_dir.display()
        )));
    }
    let store = Store::open(&data_dir)?;
    let out = dispatch(&store, &cli.command)?;
    emit(cli.format, &cli.command, &out)
}

fn init_store(data_dir: &Path) -> Result<JsonValue, TissueError> {
    let store = Store::open(data_dir)?;
    let config_path = data_dir.join(schemas::TISSUE_CONFIG_NAME);
    let wrote_config = !config_path.exists();
    if wrote_config {
        fs::write(&config_path, Config::default().to_toml()?)?;
    }
    tracing::info!(root = %store.root.display(), "store initialized");
    Ok(json!({
        "cmd": "init",
        "status": "ok",
        "root": store.root.to_string_lossy(),
        "db": store.db_path.to_string_lossy(),
        "config_written": wrote_config,
    }))
}

fn parse_spec(raw: Option<&str>, role: Option<&str>) -> Result<Option<JsonValue>, TissueError> {
    let mut spec = match raw {
        Some(raw) => Some(serde_json::from_str::<JsonValue>(raw).map_err(|e| {
            TissueError::InvalidSpec(format!("--spec is not valid JSON: {}", e))
        })?),
        None => None,
    };
    if let Some(role) = role {
        let obj = spec.get_or_insert_with(|| json!({}));
        match obj.as_object_mut() {
            Some(map) => {
                map.insert("role".to_string(), json!(role));
            }
            None => {
                return Err(TissueError::InvalidSpec(
                    "execution_spec must be an object".to_string(),
                ));
            }
        }
    }
    Ok(spec)
}

fn dispatch(store: &Store, command: &Command) -> Result<JsonValue, TissueError> {
    let defaults = &store.config.defaults;
    let out = match command {
        Command::Init => init_store(&store.root)?,
        Command::Create {
            title,
            body,
            priority,
            tags,
            role,
            spec,
            parent,
        } => {
            let mut new = NewIssue::new(title.as_str())
                .body(body.as_str())
                .tags(tags.iter().cloned());
            let has_node_tag = tags.iter().any(|t| t.trim().starts_with("node:"));
            if !has_node_tag && !defaults.node_tag.is_empty() {
                new = new.tag(defaults.node_tag.as_str());
            }
            if let Some(p) = priority {
                new = new.priority(*p);
            }
            if let Some(spec) = parse_spec(spec.as_deref(), role.as_deref())? {
                new = new.spec(spec);
            }
            if let Some(parent) = parent {
                new = new.parent(parent.as_str());
            }
            let issue = issues::create_issue(store, &new)?;
            json!({ "cmd": "create", "status": "ok", "issue": issue })
        }
        Command::Show { id } => {
            json!({ "cmd": "show", "status": "ok", "issue": issues::show_issue(store, id)? })
        }
        Command::Edit {
            id,
            title,
            body,
            priority,
            add_tags,
            remove_tags,
            role,
            spec,
        } => {
            let patch = IssuePatch {
                title: title.clone(),
                body: body.clone(),
                priority: *priority,
                execution_spec: parse_spec(spec.as_deref(), None)?,
                merge_spec: parse_spec(None, role.as_deref())?,
                add_tags: add_tags.clone(),
                remove_tags: remove_tags.clone(),
            };
            let issue = issues::edit_issue(store, id, &patch)?;
            json!({ "cmd": "edit", "status": "ok", "issue": issue })
        }
        Command::Status {
            id,
            status,
            outcome,
        } => {
            let issue = issues::set_status(store, id, *status, outcome.as_deref())?;
            json!({ "cmd": "status", "status": "ok", "issue": issue })
        }
        Command::Close { id, outcome } => {
            let issue = issues::close_issue(store, id, outcome)?;
            json!({ "cmd": "close", "status": "ok", "issue": issue })
        }
        Command::Reopen { id } => {
            let issue = issues::reopen_issue(store, id)?;
            json!({ "cmd": "reopen", "status": "ok", "issue": issue })
        }
        Command::Comment { id, body, author } => {
            let comment = issues::add_comment(store, id, body, author.as_deref())?;
            json!({ "cmd": "comment", "status": "ok", "comment": comment })
        }
        Command::Dep { src, dep_type, dst } => {
            let receipt = graph::add_dep(store, src, dst, *dep_type)?;
            json!({ "cmd": "dep", "status": "ok", "edge": receipt })
        }
        Command::Undep { src, dep_type, dst } => {
            let receipt = graph::remove_dep(store, src, dst, *dep_type)?;
            json!({ "cmd": "undep", "status": "ok", "edge": receipt })
        }
        Command::Children { id } => {
            json!({ "cmd": "children", "status": "ok", "id": id, "ids": graph::children_of(store, id)? })
        }
        Command::Ancestors { id } => {
            json!({ "cmd": "ancestors", "status": "ok", "id": id, "ids": graph::ancestors_of(store, id)? })
        }
        Command::Blockers { id } => {
            json!({ "cmd": "blockers", "status": "ok", "id": id, "ids": graph::blockers_of(store, id)? })
        }
        Command::List {
            status,
            tag,
            root,
            limit,
        } => {
            let filter = ListFilter {
                status: *status,
                tag: tag.clone(),
                root: root.clone(),
                limit: limit.unwrap_or(defaults.list_limit),
            };
            let items = issues::list_issues(store, &filter)?;
            json!({ "cmd": "list", "status": "ok", "items": items })
        }
        Command::Ready { root, tags, limit } => {
            let query = ready::ReadyQuery {
                limit: limit.unwrap_or(defaults.list_limit),
                root: root.clone(),
                tags: tags.clone(),
            };
            let items = ready::ready(store, &query)?;
            json!({ "cmd": "ready", "status": "ok", "items": items })
        }
        Command::Resumable { limit } => {
            let items = claim::resumable(store, limit.unwrap_or(defaults.list_limit))?;
            json!({ "cmd": "resumable", "status": "ok", "items": items })
        }
        Command::Claim { id } => {
            let result = claim::claim_ready_leaf(store, id)?;
            json!({ "cmd": "claim", "status": "ok", "result": result })
        }
        Command::Team { id, default_team } => {
            let fallback = default_team.as_deref().or(defaults.team.as_deref());
            let resolution = team::resolve_team(store, id, fallback)?;
            json!({ "cmd": "team", "status": "ok", "id": id, "team": resolution })
        }
        Command::Validate { root } => {
            let report = validate::validate_dag(store, root)?;
            json!({ "cmd": "validate", "status": "ok", "report": report })
        }
        Command::ValidateSubtree { root } => {
            let report = validate::validate_orchestration_subtree(store, root)?;
            json!({ "cmd": "validate-subtree", "status": "ok", "report": report })
        }
        Command::History { id } => {
            let events = events::history(store, id)?;
            json!({ "cmd": "history", "status": "ok", "id": id, "events": events })
        }
    };
    Ok(out)
}

fn emit(format: OutputFormat, command: &Command, out: &JsonValue) -> Result<(), TissueError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(out)?),
        OutputFormat::Text => print_text(command, out)?,
    }
    Ok(())
}

fn status_label(status: IssueStatus) -> colored::ColoredString {
    match status {
        IssueStatus::Open => status.as_str().green(),
        IssueStatus::InProgress => status.as_str().yellow(),
        IssueStatus::Paused => status.as_str().blue(),
        IssueStatus::Closed => status.as_str().dimmed(),
    }
}

fn issue_line(issue: &Issue) -> String {
    let mut line = format!(
        "{} [{}] p{} {}",
        issue.id.bold(),
        status_label(issue.status),
        issue.priority,
        issue.title
    );
    if let Some(outcome) = &issue.outcome {
        line.push_str(&format!(" ({})", outcome));
    }
    if !issue.tags.is_empty() {
        line.push_str(&format!(" {}", issue.tags.join(" ").cyan()));
    }
    line
}

fn print_text(command: &Command, out: &JsonValue) -> Result<(), TissueError> {
    match command {
        Command::List { .. } | Command::Ready { .. } | Command::Resumable { .. } => {
            let items: Vec<Issue> =
                serde_json::from_value(out.get("items").cloned().unwrap_or(JsonValue::Null))?;
            if items.is_empty() {
                println!("No issues found.");
            }
            for issue in &items {
                println!("{}", issue_line(issue));
            }
        }
        Command::Show { .. } | Command::Create { .. } | Command::Edit { .. } => {
            let issue: Issue =
                serde_json::from_value(out.get("issue").cloned().unwrap_or(JsonValue::Null))?;
            println!("{}", issue_line(&issue));
            if !issue.body.is_empty() {
                println!();
                println!("{}", issue.body);
            }
            for c in &issue.comments {
                println!("  {} {}: {}", c.created_at, c.author.bold(), c.body);
            }
        }
        Command::Children { .. } | Command::Ancestors { .. } | Command::Blockers { .. } => {
            if let Some(ids) = out.get("ids").and_then(JsonValue::as_array) {
                for id in ids.iter().filter_map(JsonValue::as_str) {
                    println!("{}", id);
                }
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(out)?),
    }
    Ok(())
}
