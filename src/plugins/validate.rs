//! Structural validation of a subtree.
//!
//! Both reports are computed from one [`SubtreeSnapshot`], so validating a
//! subtree of any size costs a single read connection. Findings are report
//! entries; nothing here repairs the graph.

use crate::core::error::TissueError;
use crate::core::store::Store;
use crate::plugins::issues::{IssueStatus, OUTCOME_EXPANDED};
use crate::plugins::snapshot::SubtreeSnapshot;
use crate::plugins::team::{self, TeamResolution};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub const NODE_TAG_PREFIX: &str = "node:";
pub const SUPPORTED_NODE_KINDS: &[&str] = &["agent", "root"];

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Finding {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub message: String,
}

impl Finding {
    fn on(code: &'static str, id: &str, message: String) -> Self {
        Self {
            code,
            id: Some(id.to_string()),
            src_id: None,
            dst_id: None,
            cycle: Vec::new(),
            tags: Vec::new(),
            message,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct DagChecks {
    pub parent_acyclic: bool,
    pub unsupported_node_tags: bool,
    pub terminal_outcomes: bool,
    pub blocks_sibling_wiring: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct DagReport {
    pub root_id: String,
    pub ok: bool,
    pub checks: DagChecks,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Termination {
    pub is_final: bool,
    pub reason: &'static str,
    pub has_active_descendants: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct OrchestrationReport {
    pub root_id: String,
    pub ok: bool,
    pub termination: Termination,
    pub orphaned_expanded_nodes: Vec<String>,
    pub teams: BTreeMap<String, TeamResolution>,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

pub fn validate_dag(store: &Store, root: &str) -> Result<DagReport, TissueError> {
    let snapshot = SubtreeSnapshot::load(store, root)?;
    let report = dag_report(&snapshot);
    tracing::debug!(root, ok = report.ok, errors = report.errors.len(), "validate_dag");
    Ok(report)
}

pub fn validate_orchestration_subtree(
    store: &Store,
    root: &str,
) -> Result<OrchestrationReport, TissueError> {
    let snapshot = SubtreeSnapshot::load(store, root)?;
    let report = orchestration_report(&snapshot);
    tracing::debug!(
        root,
        ok = report.ok,
        is_final = report.termination.is_final,
        reason = report.termination.reason,
        "validate_orchestration_subtree"
    );
    Ok(report)
}

pub fn dag_report(snapshot: &SubtreeSnapshot) -> DagReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let cycles = parent_cycles(snapshot);
    for cycle in &cycles {
        errors.push(Finding {
            code: "parent_cycle",
            id: cycle.first().cloned(),
            src_id: None,
            dst_id: None,
            message: format!("parent edges form a cycle: {}", cycle.join(" -> ")),
            cycle: cycle.clone(),
            tags: Vec::new(),
        });
    }

    let mut node_tags_ok = true;
    let mut outcomes_ok = true;
    for id in &snapshot.members {
        let Some(issue) = snapshot.issue(id) else {
            continue;
        };
        let bad: Vec<String> = issue
            .tag_values(NODE_TAG_PREFIX)
            .filter(|kind| !SUPPORTED_NODE_KINDS.contains(kind))
            .map(|kind| format!("{}{}", NODE_TAG_PREFIX, kind))
            .collect();
        if !bad.is_empty() {
            node_tags_ok = false;
            let mut f = Finding::on(
                "unsupported_node_tags",
                id,
                format!("unsupported node tags: {}", bad.join(", ")),
            );
            f.tags = bad;
            errors.push(f);
        }

        if issue.status.is_terminal() && issue.outcome.is_none() {
            outcomes_ok = false;
            errors.push(Finding::on(
                "terminal_node_missing_outcome",
                id,
                "closed without an outcome".to_string(),
            ));
        }

        if issue.status.is_terminal() {
            let open_children: Vec<&String> = snapshot
                .children_of(id)
                .iter()
                .filter(|c| snapshot.issue(c).is_some_and(|i| !i.status.is_terminal()))
                .collect();
            if !open_children.is_empty() {
                warnings.push(Finding::on(
                    "closed_with_active_children",
                    id,
                    format!("closed while {} child issue(s) are not closed", open_children.len()),
                ));
            }
        }
    }

    let mut wiring_ok = true;
    for (src, dst) in &snapshot.blocks {
        if !are_siblings(snapshot, src, dst) {
            wiring_ok = false;
            errors.push(Finding {
                code: "blocks_not_siblings",
                id: None,
                src_id: Some(src.clone()),
                dst_id: Some(dst.clone()),
                cycle: Vec::new(),
                tags: Vec::new(),
                message: format!("{} blocks {} but they do not share a parent", src, dst),
            });
        }
    }

    let checks = DagChecks {
        parent_acyclic: cycles.is_empty(),
        unsupported_node_tags: node_tags_ok,
        terminal_outcomes: outcomes_ok,
        blocks_sibling_wiring: wiring_ok,
    };
    DagReport {
        root_id: snapshot.root_id.clone(),
        ok: errors.is_empty(),
        checks,
        errors,
        warnings,
    }
}

/// Siblings share at least one active parent; two parentless issues are
/// top-level siblings.
fn are_siblings(snapshot: &SubtreeSnapshot, a: &str, b: &str) -> bool {
    let pa = snapshot.parents_of(a);
    let pb = snapshot.parents_of(b);
    if pa.is_empty() && pb.is_empty() {
        return true;
    }
    pa.iter().any(|p| pb.contains(p))
}

/// Distinct cycles among active parent edges reachable from the root, each
/// rotated to start at its smallest id.
pub fn parent_cycles(snapshot: &SubtreeSnapshot) -> Vec<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        Gray,
        Black,
    }

    let mut color: BTreeMap<&str, Color> = BTreeMap::new();
    let mut found: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut path: Vec<&str> = Vec::new();
    // Iterative DFS: (node, index of next child to visit).
    let mut stack: Vec<(&str, usize)> = vec![(snapshot.root_id.as_str(), 0)];
    color.insert(snapshot.root_id.as_str(), Color::Gray);
    path.push(snapshot.root_id.as_str());

    while let Some(&(node, next)) = stack.last() {
        let children = snapshot.children_of(node);
        if next >= children.len() {
            color.insert(node, Color::Black);
            stack.pop();
            path.pop();
            continue;
        }
        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }
        let child = children[next].as_str();
        match color.get(child) {
            None => {
                color.insert(child, Color::Gray);
                path.push(child);
                stack.push((child, 0));
            }
            Some(Color::Gray) => {
                if let Some(start) = path.iter().position(|n| *n == child) {
                    found.insert(canonical_cycle(&path[start..]));
                }
            }
            Some(Color::Black) => {}
        }
    }
    found.into_iter().collect()
}

fn canonical_cycle(nodes: &[&str]) -> Vec<String> {
    let pivot = nodes
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    nodes[pivot..]
        .iter()
        .chain(nodes[..pivot].iter())
        .map(|n| n.to_string())
        .collect()
}

/// Members that have at least one non-closed strict descendant.
fn nodes_with_active_descendants(snapshot: &SubtreeSnapshot) -> FxHashSet<String> {
    let members: FxHashSet<&str> = snapshot.members.iter().map(String::as_str).collect();
    let mut marked: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<&str> = snapshot
        .members
        .iter()
        .filter(|id| snapshot.issue(id).is_some_and(|i| !i.status.is_terminal()))
        .map(String::as_str)
        .collect();
    while let Some(node) = queue.pop_front() {
        for parent in snapshot.parents_of(node) {
            if members.contains(parent.as_str()) && marked.insert(parent.clone()) {
                queue.push_back(parent.as_str());
            }
        }
    }
    marked
}

fn is_expanded(snapshot: &SubtreeSnapshot, id: &str) -> bool {
    snapshot.issue(id).is_some_and(|i| {
        i.status == IssueStatus::Closed && i.outcome.as_deref() == Some(OUTCOME_EXPANDED)
    })
}

pub fn orchestration_report(snapshot: &SubtreeSnapshot) -> OrchestrationReport {
    let root = snapshot.root_id.as_str();
    let active = nodes_with_active_descendants(snapshot);
    let root_active = active.contains(root);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let termination = match snapshot.issue(root) {
        Some(issue) if issue.status != IssueStatus::Closed => Termination {
            is_final: false,
            reason: "root_not_closed",
            has_active_descendants: root_active,
        },
        _ if is_expanded(snapshot, root) => Termination {
            is_final: false,
            reason: "expanded_non_final",
            has_active_descendants: root_active,
        },
        _ if root_active => Termination {
            is_final: false,
            reason: "closed_with_active_descendants",
            has_active_descendants: true,
        },
        _ => Termination {
            is_final: true,
            reason: "closed",
            has_active_descendants: false,
        },
    };

    let orphaned: Vec<String> = snapshot
        .members
        .iter()
        .filter(|id| is_expanded(snapshot, id) && !active.contains(id.as_str()))
        .cloned()
        .collect();
    for id in &orphaned {
        errors.push(Finding::on(
            "orphaned_expanded_node",
            id,
            format!("{} is closed as expanded but has no active descendants", id),
        ));
        if id == root {
            warnings.push(Finding::on(
                "root_expanded_without_active_descendants",
                id,
                "root was expanded but nothing under it is still open".to_string(),
            ));
        }
    }

    let bulk = team::resolve_snapshot_teams(snapshot, None);
    for (id, tags) in &bulk.ambiguous {
        let mut f = Finding::on(
            "ambiguous_team_tag",
            id,
            format!("more than one team tag: {}", tags.join(", ")),
        );
        f.tags = tags.clone();
        errors.push(f);
    }

    OrchestrationReport {
        root_id: root.to_string(),
        ok: errors.is_empty(),
        termination,
        orphaned_expanded_nodes: orphaned,
        teams: bulk.resolved,
        errors,
        warnings,
    }
}
