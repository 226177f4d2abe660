use serde_json::json;
use tempfile::{TempDir, tempdir};
use tissue::core::error::TissueError;
use tissue::core::events;
use tissue::core::store::Store;
use tissue::plugins::graph;
use tissue::plugins::issues::{
    self, IssuePatch, IssueStatus, ListFilter, NewIssue, add_comment, close_issue, create_issue,
    edit_issue, get_issue, list_issues, reopen_issue, set_status, show_issue,
};

fn store() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open(&tmp.path().join(".tissue")).unwrap();
    (tmp, store)
}

fn all(store: &Store) -> Vec<issues::Issue> {
    list_issues(
        store,
        &ListFilter {
            limit: 1000,
            ..ListFilter::default()
        },
    )
    .unwrap()
}

#[test]
fn test_create_applies_defaults() {
    let (_tmp, store) = store();
    let issue = create_issue(
        &store,
        &NewIssue::new("  Write parser  ").tags(["team:core", " team:core", "granularity:small"]),
    )
    .unwrap();

    assert!(issue.id.starts_with("is-"));
    assert_eq!(issue.title, "Write parser");
    assert_eq!(issue.body, "");
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.priority, 3);
    assert_eq!(issue.outcome, None);
    assert_eq!(issue.tags, vec!["granularity:small", "team:core"]);
    assert!(issue.execution_spec.is_empty());
    assert_eq!(issue.created_at, issue.updated_at);
}

#[test]
fn test_ids_and_timestamps_follow_creation_order() {
    let (_tmp, store) = store();
    let created: Vec<_> = (0..25)
        .map(|i| create_issue(&store, &NewIssue::new(format!("issue {}", i))).unwrap())
        .collect();

    for pair in created.windows(2) {
        assert!(pair[0].id < pair[1].id, "{} !< {}", pair[0].id, pair[1].id);
        assert!(pair[0].created_at < pair[1].created_at);
    }
    let listed: Vec<String> = all(&store).into_iter().map(|i| i.id).collect();
    let expected: Vec<String> = created.into_iter().map(|i| i.id).collect();
    assert_eq!(listed, expected);
}

#[test]
fn test_create_rejects_bad_input_without_writing() {
    let (_tmp, store) = store();

    let err = create_issue(
        &store,
        &NewIssue::new("legacy").spec(json!({"control_flow": {"loop": true}})),
    )
    .unwrap_err();
    assert!(matches!(err, TissueError::InvalidSpec(_)));
    assert_eq!(err.code(), "invalid_spec");

    assert!(matches!(
        create_issue(&store, &NewIssue::new("   ")),
        Err(TissueError::ValidationError(_))
    ));
    assert!(matches!(
        create_issue(&store, &NewIssue::new("p").priority(9)),
        Err(TissueError::ValidationError(_))
    ));
    assert!(matches!(
        create_issue(&store, &NewIssue::new("orphan").parent("is-missing")),
        Err(TissueError::NotFound(_))
    ));

    assert!(all(&store).is_empty());
}

#[test]
fn test_create_with_parent_writes_edge() {
    let (_tmp, store) = store();
    let parent = create_issue(&store, &NewIssue::new("epic")).unwrap();
    let child = create_issue(&store, &NewIssue::new("task").parent(parent.id.as_str())).unwrap();

    assert_eq!(graph::children_of(&store, &parent.id).unwrap(), vec![child.id.clone()]);
    assert_eq!(graph::parents_of(&store, &child.id).unwrap(), vec![parent.id]);
}

#[test]
fn test_outcome_round_trip() {
    let (_tmp, store) = store();
    let issue = create_issue(&store, &NewIssue::new("work")).unwrap();

    let err = set_status(&store, &issue.id, IssueStatus::Closed, None).unwrap_err();
    assert!(matches!(err, TissueError::OutcomeRequired(_)));

    let err = set_status(&store, &issue.id, IssueStatus::Paused, Some("success")).unwrap_err();
    assert!(matches!(err, TissueError::OutcomeOnNonTerminal { .. }));
    assert_eq!(show_issue(&store, &issue.id).unwrap().status, IssueStatus::Open);

    let closed = close_issue(&store, &issue.id, "success").unwrap();
    assert_eq!(closed.status, IssueStatus::Closed);
    assert_eq!(closed.outcome.as_deref(), Some("success"));

    let reopened = reopen_issue(&store, &issue.id).unwrap();
    assert_eq!(reopened.status, IssueStatus::Open);
    assert_eq!(reopened.outcome, None);
    assert!(reopened.updated_at > closed.updated_at);

    assert!(matches!(
        set_status(&store, &issue.id, IssueStatus::Closed, Some("  ")),
        Err(TissueError::OutcomeRequired(_))
    ));
    let again = set_status(&store, &issue.id, IssueStatus::Closed, Some("expanded")).unwrap();
    assert_eq!(again.outcome.as_deref(), Some("expanded"));

    let paused = set_status(&store, &issue.id, IssueStatus::Paused, None).unwrap();
    assert_eq!(paused.outcome, None);
}

#[test]
fn test_set_status_unknown_id() {
    let (_tmp, store) = store();
    let err = set_status(&store, "is-nope", IssueStatus::Paused, None).unwrap_err();
    assert!(matches!(err, TissueError::NotFound(_)));
    assert_eq!(err.code(), "not_found");
}

#[test]
fn test_edit_updates_fields_tags_and_spec() {
    let (_tmp, store) = store();
    let issue = create_issue(
        &store,
        &NewIssue::new("draft")
            .tags(["team:a", "stale"])
            .spec(json!({"role": "worker", "model": "m1"})),
    )
    .unwrap();

    let edited = edit_issue(
        &store,
        &issue.id,
        &IssuePatch {
            title: Some("final".to_string()),
            priority: Some(1),
            merge_spec: Some(json!({"role": "reviewer"})),
            add_tags: vec!["team:b".to_string()],
            remove_tags: vec!["stale".to_string(), "team:a".to_string()],
            ..IssuePatch::default()
        },
    )
    .unwrap();
    assert_eq!(edited.title, "final");
    assert_eq!(edited.priority, 1);
    assert_eq!(edited.tags, vec!["team:b"]);
    assert_eq!(edited.execution_spec.get("role"), Some(&json!("reviewer")));
    assert_eq!(edited.execution_spec.get("model"), Some(&json!("m1")));
    assert!(edited.updated_at > issue.updated_at);
    assert_eq!(edited.created_at, issue.created_at);

    let replaced = edit_issue(
        &store,
        &issue.id,
        &IssuePatch {
            execution_spec: Some(json!({"role": "planner"})),
            ..IssuePatch::default()
        },
    )
    .unwrap();
    assert_eq!(replaced.execution_spec.get("model"), None);

    let err = edit_issue(
        &store,
        &issue.id,
        &IssuePatch {
            merge_spec: Some(json!({"control_flow": []})),
            ..IssuePatch::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, TissueError::InvalidSpec(_)));

    assert!(matches!(
        edit_issue(&store, "is-missing", &IssuePatch::default()),
        Err(TissueError::NotFound(_))
    ));
}

#[test]
fn test_show_and_get() {
    let (_tmp, store) = store();
    assert!(get_issue(&store, "is-none").unwrap().is_none());
    assert!(matches!(
        show_issue(&store, "is-none"),
        Err(TissueError::NotFound(_))
    ));
}

#[test]
fn test_comments_are_ordered_and_bump_updated_at() {
    let (_tmp, store) = store();
    let issue = create_issue(&store, &NewIssue::new("discuss")).unwrap();

    let first = add_comment(&store, &issue.id, "first", Some("alice")).unwrap();
    let second = add_comment(&store, &issue.id, "second", None).unwrap();
    assert!(first.id.starts_with("cm-"));
    assert_eq!(second.author, "tissue");

    let shown = show_issue(&store, &issue.id).unwrap();
    let bodies: Vec<&str> = shown.comments.iter().map(|c| c.body.as_str()).collect();
    assert_eq!(bodies, vec!["first", "second"]);
    assert_eq!(shown.updated_at, second.created_at);

    assert!(matches!(
        add_comment(&store, "is-missing", "x", None),
        Err(TissueError::NotFound(_))
    ));
    assert!(add_comment(&store, &issue.id, "  ", None).is_err());
}

#[test]
fn test_list_filters() {
    let (_tmp, store) = store();
    let root = create_issue(&store, &NewIssue::new("root")).unwrap();
    let a = create_issue(&store, &NewIssue::new("a").parent(root.id.as_str()).tag("team:x")).unwrap();
    let _b = create_issue(&store, &NewIssue::new("b").parent(root.id.as_str())).unwrap();
    let outside = create_issue(&store, &NewIssue::new("outside").tag("team:x")).unwrap();
    close_issue(&store, &outside.id, "success").unwrap();

    let by_tag = list_issues(
        &store,
        &ListFilter {
            tag: Some("team:x".to_string()),
            limit: 10,
            ..ListFilter::default()
        },
    )
    .unwrap();
    assert_eq!(by_tag.len(), 2);

    let closed = list_issues(
        &store,
        &ListFilter {
            status: Some(IssueStatus::Closed),
            limit: 10,
            ..ListFilter::default()
        },
    )
    .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].id, outside.id);

    let scoped = list_issues(
        &store,
        &ListFilter {
            root: Some(root.id.clone()),
            tag: Some("team:x".to_string()),
            limit: 10,
            ..ListFilter::default()
        },
    )
    .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, a.id);

    let limited = list_issues(
        &store,
        &ListFilter {
            limit: 2,
            ..ListFilter::default()
        },
    )
    .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, root.id);

    let err = list_issues(
        &store,
        &ListFilter {
            root: Some("is-ghost".to_string()),
            limit: 10,
            ..ListFilter::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, TissueError::UnknownIssue(_)));
}

#[test]
fn test_history_records_mutations() {
    let (_tmp, store) = store();
    let issue = create_issue(&store, &NewIssue::new("tracked")).unwrap();
    close_issue(&store, &issue.id, "success").unwrap();
    reopen_issue(&store, &issue.id).unwrap();

    let history = events::history(&store, &issue.id).unwrap();
    let kinds: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["issue.create", "issue.status", "issue.status"]);
    assert_eq!(history[1].payload["outcome"], json!("success"));
    assert!(history.windows(2).all(|w| w[0].ts < w[1].ts));
}

#[test]
fn test_corrupt_rows_surface_as_storage_errors() {
    let (_tmp, store) = store();
    let issue = create_issue(&store, &NewIssue::new("damaged")).unwrap();

    store
        .write("test.corrupt_spec", |conn| {
            conn.execute(
                "UPDATE issues SET execution_spec = 'not json' WHERE id = ?1",
                [issue.id.as_str()],
            )?;
            Ok(())
        })
        .unwrap();
    let err = get_issue(&store, &issue.id).unwrap_err();
    assert!(matches!(err, TissueError::RusqliteError(_)));
    assert_eq!(err.code(), "storage_error");

    store
        .write("test.corrupt_status", |conn| {
            conn.execute_batch(&format!(
                "PRAGMA ignore_check_constraints = ON;
                 UPDATE issues SET execution_spec = '{{}}', status = 'lost' WHERE id = '{}';
                 PRAGMA ignore_check_constraints = OFF;",
                issue.id
            ))?;
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        get_issue(&store, &issue.id),
        Err(TissueError::RusqliteError(_))
    ));
    let filter = ListFilter {
        limit: 10,
        ..ListFilter::default()
    };
    assert!(list_issues(&store, &filter).is_err());

    store
        .write("test.corrupt_payload", |conn| {
            conn.execute(
                "UPDATE issue_events SET payload = '{' WHERE issue_id = ?1",
                [issue.id.as_str()],
            )?;
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        events::history(&store, &issue.id),
        Err(TissueError::RusqliteError(_))
    ));
}
