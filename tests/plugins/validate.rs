use tempfile::{TempDir, tempdir};
use tissue::core::error::TissueError;
use tissue::core::store::Store;
use tissue::plugins::graph::{DepType, add_dep};
use tissue::plugins::issues::{NewIssue, close_issue, create_issue};
use tissue::plugins::validate::{validate_dag, validate_orchestration_subtree};

fn store() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open(&tmp.path().join(".tissue")).unwrap();
    (tmp, store)
}

fn child(store: &Store, parent: &str, title: &str) -> String {
    create_issue(store, &NewIssue::new(title).parent(parent)).unwrap().id
}

#[test]
fn test_expanded_root_with_finished_child_is_orphaned() {
    let (_tmp, store) = store();
    let r = create_issue(&store, &NewIssue::new("R")).unwrap().id;
    let c = child(&store, &r, "C");
    close_issue(&store, &c, "success").unwrap();
    close_issue(&store, &r, "expanded").unwrap();

    let report = validate_orchestration_subtree(&store, &r).unwrap();
    assert!(!report.termination.is_final);
    assert_eq!(report.termination.reason, "expanded_non_final");
    assert!(!report.termination.has_active_descendants);
    assert_eq!(report.orphaned_expanded_nodes, vec![r.clone()]);
    assert!(
        report
            .errors
            .iter()
            .any(|f| f.code == "orphaned_expanded_node" && f.id.as_deref() == Some(r.as_str()))
    );
    assert!(
        report
            .warnings
            .iter()
            .any(|f| f.code == "root_expanded_without_active_descendants")
    );
}

#[test]
fn test_expanded_root_with_open_work_is_healthy() {
    let (_tmp, store) = store();
    let r = create_issue(&store, &NewIssue::new("R")).unwrap().id;
    let _open = child(&store, &r, "still going");
    close_issue(&store, &r, "expanded").unwrap();

    let report = validate_orchestration_subtree(&store, &r).unwrap();
    assert_eq!(report.termination.reason, "expanded_non_final");
    assert!(report.termination.has_active_descendants);
    assert!(report.orphaned_expanded_nodes.is_empty());
    assert!(report.ok);
}

#[test]
fn test_finished_tree_is_final() {
    let (_tmp, store) = store();
    let r = create_issue(&store, &NewIssue::new("R").tag("team:platform")).unwrap().id;
    let a = child(&store, &r, "a");
    close_issue(&store, &a, "success").unwrap();
    close_issue(&store, &r, "success").unwrap();

    let report = validate_orchestration_subtree(&store, &r).unwrap();
    assert!(report.termination.is_final);
    assert_eq!(report.termination.reason, "closed");
    assert_eq!(report.teams[&a].team, "platform");
}

#[test]
fn test_unknown_root() {
    let (_tmp, store) = store();
    assert!(matches!(
        validate_dag(&store, "is-ghost"),
        Err(TissueError::UnknownIssue(_))
    ));
    assert!(matches!(
        validate_orchestration_subtree(&store, "is-ghost"),
        Err(TissueError::UnknownIssue(_))
    ));
}

#[test]
fn test_dag_wiring_and_node_tags() {
    let (_tmp, store) = store();
    let r = create_issue(&store, &NewIssue::new("R").tag("node:root")).unwrap().id;
    let a = child(&store, &r, "a");
    let b = child(&store, &r, "b");
    let nested = child(&store, &a, "nested");
    let odd = create_issue(&store, &NewIssue::new("odd").parent(r.as_str()).tag("node:robot"))
        .unwrap()
        .id;

    add_dep(&store, &a, &b, DepType::Blocks).unwrap();
    let clean = validate_dag(&store, &r).unwrap();
    assert!(clean.checks.blocks_sibling_wiring);
    assert!(clean.checks.parent_acyclic);
    assert!(clean.checks.terminal_outcomes);
    assert!(!clean.checks.unsupported_node_tags);
    assert_eq!(clean.errors.len(), 1);
    assert_eq!(clean.errors[0].id.as_deref(), Some(odd.as_str()));

    add_dep(&store, &nested, &b, DepType::Blocks).unwrap();
    let wired = validate_dag(&store, &r).unwrap();
    assert!(!wired.checks.blocks_sibling_wiring);
    let finding = wired
        .errors
        .iter()
        .find(|f| f.code == "blocks_not_siblings")
        .expect("wiring finding");
    assert_eq!(finding.src_id.as_deref(), Some(nested.as_str()));
    assert_eq!(finding.dst_id.as_deref(), Some(b.as_str()));
}

#[test]
fn test_closed_parent_with_open_child_warns() {
    let (_tmp, store) = store();
    let r = create_issue(&store, &NewIssue::new("R")).unwrap().id;
    let _c = child(&store, &r, "open child");
    close_issue(&store, &r, "success").unwrap();

    let dag = validate_dag(&store, &r).unwrap();
    assert!(dag.ok);
    assert_eq!(dag.warnings[0].code, "closed_with_active_children");

    let orch = validate_orchestration_subtree(&store, &r).unwrap();
    assert_eq!(orch.termination.reason, "closed_with_active_descendants");
}

#[test]
fn test_large_subtree_validates_on_one_connection() {
    let (_tmp, store) = store();
    let r = create_issue(&store, &NewIssue::new("R").tag("team:platform")).unwrap().id;
    let mut frontier = vec![r.clone()];
    let mut count = 1;
    while count < 300 {
        let mut next = Vec::new();
        for parent in &frontier {
            for _ in 0..4 {
                if count >= 300 {
                    break;
                }
                next.push(child(&store, parent, &format!("n{}", count)));
                count += 1;
            }
        }
        frontier = next;
    }
    for pair in frontier.windows(2).step_by(2) {
        add_dep(&store, &pair[0], &pair[1], DepType::Blocks).unwrap();
    }

    let before = store.connections_opened();
    let report = validate_orchestration_subtree(&store, &r).unwrap();
    assert_eq!(store.connections_opened() - before, 1);
    assert_eq!(report.teams.len(), 300);

    let before = store.connections_opened();
    let dag = validate_dag(&store, &r).unwrap();
    assert_eq!(store.connections_opened() - before, 1);
    assert!(dag.checks.parent_acyclic);
}
