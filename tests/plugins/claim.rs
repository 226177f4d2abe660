use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::{TempDir, tempdir};
use tissue::core::error::TissueError;
use tissue::core::events;
use tissue::core::store::Store;
use tissue::plugins::claim::{claim_ready_leaf, resumable};
use tissue::plugins::graph::{DepType, add_dep};
use tissue::plugins::issues::{IssueStatus, NewIssue, close_issue, create_issue, set_status};
use tissue::plugins::ready::{ReadyQuery, ready};

fn store() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open(&tmp.path().join(".tissue")).unwrap();
    (tmp, store)
}

#[test]
fn test_claim_is_one_shot() {
    let (_tmp, store) = store();
    let id = create_issue(&store, &NewIssue::new("leaf")).unwrap().id;

    let first = claim_ready_leaf(&store, &id).unwrap();
    assert!(first.claimed);
    assert_eq!(first.issue.status, IssueStatus::InProgress);
    assert_eq!(first.claimed_at, Some(first.issue.updated_at));

    let second = claim_ready_leaf(&store, &id).unwrap();
    assert!(!second.claimed);
    assert_eq!(second.claimed_at, None);
    assert_eq!(second.issue.status, IssueStatus::InProgress);
    assert_eq!(second.issue.updated_at, first.issue.updated_at);

    let claims = events::history(&store, &id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == "issue.claim")
        .count();
    assert_eq!(claims, 1);
}

#[test]
fn test_claim_refuses_non_ready_issues() {
    let (_tmp, store) = store();
    let blocker = create_issue(&store, &NewIssue::new("blocker")).unwrap().id;
    let blocked = create_issue(&store, &NewIssue::new("blocked")).unwrap().id;
    add_dep(&store, &blocker, &blocked, DepType::Blocks).unwrap();
    let epic = create_issue(&store, &NewIssue::new("epic")).unwrap().id;
    create_issue(&store, &NewIssue::new("child").parent(epic.as_str())).unwrap();
    let paused = create_issue(&store, &NewIssue::new("paused")).unwrap().id;
    set_status(&store, &paused, IssueStatus::Paused, None).unwrap();

    for id in [&blocked, &epic, &paused] {
        let result = claim_ready_leaf(&store, id).unwrap();
        assert!(!result.claimed, "{} should not be claimable", result.issue.title);
        assert_ne!(result.issue.status, IssueStatus::InProgress);
    }

    close_issue(&store, &blocker, "success").unwrap();
    assert!(claim_ready_leaf(&store, &blocked).unwrap().claimed);

    let err = claim_ready_leaf(&store, "is-missing").unwrap_err();
    assert!(matches!(err, TissueError::NotFound(_)));
}

#[test]
fn test_concurrent_claims_have_one_winner() {
    let (_tmp, store) = store();
    let id = create_issue(&store, &NewIssue::new("contended")).unwrap().id;

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let store = store.clone();
            let id = id.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                claim_ready_leaf(&store, &id).unwrap().claimed
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|claimed| *claimed)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn test_workers_drain_ready_queue_without_double_claims() {
    let (_tmp, store) = store();
    for i in 0..20 {
        create_issue(&store, &NewIssue::new(format!("job {}", i))).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                let mut mine = Vec::new();
                loop {
                    let candidates = ready(&store, &ReadyQuery::new(5)).unwrap();
                    if candidates.is_empty() {
                        break;
                    }
                    for c in candidates {
                        if claim_ready_leaf(&store, &c.id).unwrap().claimed {
                            mine.push(c.id);
                        }
                    }
                }
                mine
            })
        })
        .collect();

    let mut claimed: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = claimed.len();
    claimed.sort();
    claimed.dedup();
    assert_eq!(total, 20);
    assert_eq!(claimed.len(), 20);
}

#[test]
fn test_resumable_is_oldest_first_ignoring_priority() {
    let (_tmp, store) = store();
    let old_low = create_issue(&store, &NewIssue::new("old low").priority(5)).unwrap().id;
    let new_high = create_issue(&store, &NewIssue::new("new high").priority(1)).unwrap().id;
    let untouched = create_issue(&store, &NewIssue::new("untouched")).unwrap().id;

    claim_ready_leaf(&store, &new_high).unwrap();
    claim_ready_leaf(&store, &old_low).unwrap();

    let ids: Vec<String> = resumable(&store, 10).unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![old_low.clone(), new_high]);
    assert!(!ids.contains(&untouched));
    assert_eq!(resumable(&store, 1).unwrap()[0].id, old_low);
}
