use tempfile::{TempDir, tempdir};
use tissue::core::error::TissueError;
use tissue::core::store::Store;
use tissue::plugins::graph::{DepType, add_dep};
use tissue::plugins::issues::{NewIssue, create_issue};
use tissue::plugins::team::{TeamSource, resolve_subtree_teams, resolve_team};

fn store() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open(&tmp.path().join(".tissue")).unwrap();
    (tmp, store)
}

#[test]
fn test_platform_worker_chain() {
    let (_tmp, store) = store();
    let a = create_issue(&store, &NewIssue::new("A").tag("team:platform")).unwrap().id;
    let b = create_issue(&store, &NewIssue::new("B").parent(a.as_str())).unwrap().id;
    let c = create_issue(&store, &NewIssue::new("C").parent(b.as_str()).tag("team:worker"))
        .unwrap()
        .id;

    let rc = resolve_team(&store, &c, None).unwrap();
    assert_eq!(rc.team, "worker");
    assert_eq!(rc.source, TeamSource::IssueTag);
    assert_eq!(rc.source_issue_id, c);

    let rb = resolve_team(&store, &b, None).unwrap();
    assert_eq!(rb.team, "platform");
    assert_eq!(rb.source, TeamSource::AncestorTag);
    assert_eq!(rb.source_issue_id, a);
    assert_eq!(rb.source_tag.as_deref(), Some("team:platform"));
    assert_eq!(rb.depth, 2);
    assert_eq!(rc.depth, 0);
}

#[test]
fn test_default_and_failures() {
    let (_tmp, store) = store();
    let plain = create_issue(&store, &NewIssue::new("plain")).unwrap().id;
    let twice = create_issue(&store, &NewIssue::new("twice").tags(["team:a", "team:b"]))
        .unwrap()
        .id;

    let fallback = resolve_team(&store, &plain, Some("ops")).unwrap();
    assert_eq!(fallback.team, "ops");
    assert_eq!(fallback.source, TeamSource::Default);

    let err = resolve_team(&store, &plain, None).unwrap_err();
    assert!(matches!(err, TissueError::UnresolvableTeam(_)));
    assert_eq!(err.code(), "unresolvable_team");

    let err = resolve_team(&store, &twice, Some("ops")).unwrap_err();
    assert!(matches!(err, TissueError::AmbiguousTeamTag { .. }));

    assert!(matches!(
        resolve_team(&store, "is-missing", Some("ops")),
        Err(TissueError::NotFound(_))
    ));
}

#[test]
fn test_deep_chain_uses_constant_connections() {
    let (_tmp, store) = store();
    let top = create_issue(&store, &NewIssue::new("top").tag("team:core")).unwrap().id;
    let mut last = top.clone();
    for i in 0..30 {
        last = create_issue(&store, &NewIssue::new(format!("level {}", i)).parent(last.as_str()))
            .unwrap()
            .id;
    }

    let before = store.connections_opened();
    let r = resolve_team(&store, &last, None).unwrap();
    assert_eq!(store.connections_opened() - before, 1);
    assert_eq!(r.team, "core");
    assert_eq!(r.source_issue_id, top);
    assert_eq!(r.depth, 31);
}

#[test]
fn test_subtree_resolution_in_bulk() {
    let (_tmp, store) = store();
    let outer = create_issue(&store, &NewIssue::new("outer").tag("team:platform")).unwrap().id;
    let root = create_issue(&store, &NewIssue::new("root")).unwrap().id;
    add_dep(&store, &outer, &root, DepType::Parent).unwrap();
    let mut leaves = Vec::new();
    for i in 0..40 {
        let tags: Vec<&str> = if i % 10 == 0 { vec!["team:worker"] } else { vec![] };
        leaves.push(
            create_issue(
                &store,
                &NewIssue::new(format!("leaf {}", i)).parent(root.as_str()).tags(tags),
            )
            .unwrap()
            .id,
        );
    }

    let before = store.connections_opened();
    let bulk = resolve_subtree_teams(&store, &root, None).unwrap();
    assert_eq!(store.connections_opened() - before, 1);

    assert_eq!(bulk.resolved.len(), 41);
    assert_eq!(bulk.resolved[&root].team, "platform");
    assert_eq!(bulk.resolved[&leaves[0]].team, "worker");
    assert_eq!(bulk.resolved[&leaves[1]].team, "platform");
    assert_eq!(bulk.resolved[&root].depth, 2);
    assert_eq!(bulk.resolved[&leaves[1]].depth, 3);
    assert_eq!(bulk.resolved[&leaves[0]].depth, 0);
    assert!(bulk.ambiguous.is_empty());
    assert!(bulk.unresolved.is_empty());
}
