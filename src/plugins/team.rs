//! Team ownership resolution through `team:*` tags inherited down the
//! parent chain.

use crate::core::error::TissueError;
use crate::core::store::Store;
use crate::plugins::graph;
use crate::plugins::issues;
use crate::plugins::snapshot::SubtreeSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;

pub const TEAM_TAG_PREFIX: &str = "team:";

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TeamSource {
    IssueTag,
    AncestorTag,
    Default,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct TeamResolution {
    pub team: String,
    pub source: TeamSource,
    pub source_issue_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    /// 0 for the issue's own tag; an ancestor match reports its parent hops
    /// plus one, so the parent is 2.
    pub depth: u32,
}

fn team_tags(tags: &[String]) -> Vec<&str> {
    tags.iter()
        .filter(|t| t.strip_prefix(TEAM_TAG_PREFIX).is_some_and(|v| !v.is_empty()))
        .map(String::as_str)
        .collect()
}

/// Resolve over arbitrary lookups. Used by both the single-issue path and
/// bulk resolution over a snapshot.
pub fn resolve_team_with<'a, T, P>(
    id: &str,
    tags_of: T,
    parents_of: P,
    default_team: Option<&str>,
) -> Result<TeamResolution, TissueError>
where
    T: Fn(&str) -> &'a [String],
    P: Fn(&str) -> &'a [String],
{
    let own = team_tags(tags_of(id));
    if own.len() > 1 {
        return Err(TissueError::AmbiguousTeamTag {
            id: id.to_string(),
            tags: own.iter().map(|t| t.to_string()).collect(),
        });
    }
    if let Some(tag) = own.first() {
        return Ok(TeamResolution {
            team: tag[TEAM_TAG_PREFIX.len()..].to_string(),
            source: TeamSource::IssueTag,
            source_issue_id: id.to_string(),
            source_tag: Some(tag.to_string()),
            depth: 0,
        });
    }

    for (ancestor, hops) in graph::bfs_ancestors_with_depth(id, &parents_of) {
        // Ancestors with conflicting tags are skipped, not fatal.
        if let [tag] = team_tags(tags_of(&ancestor)).as_slice() {
            return Ok(TeamResolution {
                team: tag[TEAM_TAG_PREFIX.len()..].to_string(),
                source: TeamSource::AncestorTag,
                source_tag: Some(tag.to_string()),
                source_issue_id: ancestor,
                depth: hops + 1,
            });
        }
    }

    match default_team.map(str::trim).filter(|t| !t.is_empty()) {
        Some(team) => Ok(TeamResolution {
            team: team.to_string(),
            source: TeamSource::Default,
            source_issue_id: id.to_string(),
            source_tag: None,
            depth: 0,
        }),
        None => Err(TissueError::UnresolvableTeam(id.to_string())),
    }
}

/// Resolve the owning team of `id`, reading its lineage and the lineage's
/// tags on one connection.
pub fn resolve_team(
    store: &Store,
    id: &str,
    default_team: Option<&str>,
) -> Result<TeamResolution, TissueError> {
    let resolution = store.read("team.resolve", |conn| {
        graph::require_issue(conn, id)?;
        let lineage = graph::load_parent_map_upward(conn, id)?;
        let mut ids: Vec<&str> = vec![id];
        for (child, parents) in &lineage {
            ids.push(child.as_str());
            ids.extend(parents.iter().map(String::as_str));
        }
        ids.sort_unstable();
        ids.dedup();
        let tags = issues::load_tags(conn, &ids)?;
        resolve_team_with(
            id,
            |n| tags.get(n).map(Vec::as_slice).unwrap_or(&[]),
            |n| lineage.get(n).map(Vec::as_slice).unwrap_or(&[]),
            default_team,
        )
    })?;
    tracing::debug!(id, team = %resolution.team, source = ?resolution.source, "team resolved");
    Ok(resolution)
}

/// Outcome of resolving every member of a snapshot.
#[derive(Debug, Default)]
pub struct BulkTeams {
    pub resolved: BTreeMap<String, TeamResolution>,
    /// `(id, team tags)` for members carrying more than one team tag.
    pub ambiguous: Vec<(String, Vec<String>)>,
    pub unresolved: Vec<String>,
}

pub fn resolve_snapshot_teams(snapshot: &SubtreeSnapshot, default_team: Option<&str>) -> BulkTeams {
    let mut out = BulkTeams::default();
    for id in &snapshot.members {
        match resolve_team_with(
            id,
            |n| snapshot.tags_of(n),
            |n| snapshot.parents_of(n),
            default_team,
        ) {
            Ok(resolution) => {
                out.resolved.insert(id.clone(), resolution);
            }
            Err(TissueError::AmbiguousTeamTag { id, tags }) => out.ambiguous.push((id, tags)),
            Err(_) => out.unresolved.push(id.clone()),
        }
    }
    out
}

/// Teams for every node in the subtree of `root`, one snapshot load.
pub fn resolve_subtree_teams(
    store: &Store,
    root: &str,
    default_team: Option<&str>,
) -> Result<BulkTeams, TissueError> {
    let snapshot = SubtreeSnapshot::load(store, root)?;
    Ok(resolve_snapshot_teams(&snapshot, default_team))
}
