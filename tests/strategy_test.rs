//! Tests for rebroadcast assignment strategies.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use delegate_queue::config::AssignmentMode;
use delegate_queue::engine::strategy::{self, AssignmentStrategy};
use delegate_queue::engine::{CapabilityAssignmentStrategy, FlaggedAssignmentStrategy};
use delegate_queue::model::{AccountId, Task, keys};
use delegate_queue::store::{TaskStore, TaskUpdate};

fn task() -> Task {
    Task::queued(account(), NOW - 60_000, NOW + 60_000).with_version(VERSION)
}

#[tokio::test]
async fn capability_moves_previous_pre_assignment_into_tried_set() {
    let assignment = Arc::new(FakeAssignment::default().with_capable(&["d1", "d2", "d3"]));
    let strategy = CapabilityAssignmentStrategy::new(assignment.clone());
    let mut t = task();
    t.pre_assigned_delegate_id = Some(delegate("d1"));
    t.already_tried_delegates.insert(delegate("d2"));

    let mut update = TaskUpdate::new();
    strategy.prepare(&t, &mut update).await.unwrap();

    let expected: BTreeSet<_> = [delegate("d1"), delegate("d2")].into_iter().collect();
    assert_eq!(assignment.exclusions_seen.lock().unwrap()[0], expected);
    assert_eq!(update.sets()[keys::PRE_ASSIGNED_DELEGATE_ID], "d3");
    assert_eq!(
        update.sets()[keys::ALREADY_TRIED_DELEGATES],
        serde_json::json!(["d1", "d2"])
    );
}

#[tokio::test]
async fn capability_clears_pre_assignment_when_nobody_is_left() {
    let assignment = Arc::new(FakeAssignment::default().with_capable(&["d1"]));
    let strategy = CapabilityAssignmentStrategy::new(assignment);
    let mut t = task();
    t.pre_assigned_delegate_id = Some(delegate("d1"));

    let mut update = TaskUpdate::new();
    strategy.prepare(&t, &mut update).await.unwrap();

    assert!(!update.sets().contains_key(keys::PRE_ASSIGNED_DELEGATE_ID));
    assert!(update.unsets().any(|k| k == keys::PRE_ASSIGNED_DELEGATE_ID));
}

#[tokio::test]
async fn capability_leaves_pinned_task_alone() {
    let assignment = Arc::new(FakeAssignment::default().with_capable(&["d2"]));
    let strategy = CapabilityAssignmentStrategy::new(assignment.clone());
    let mut t = task();
    t.pre_assigned_delegate_id = Some(delegate("d1"));
    t.must_execute_on_delegate_id = Some(delegate("d1"));

    let mut update = TaskUpdate::new();
    strategy.prepare(&t, &mut update).await.unwrap();

    assert!(update.is_empty());
    assert!(assignment.exclusions_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn capability_lookup_failure_propagates() {
    let strategy = CapabilityAssignmentStrategy::new(Arc::new(FakeAssignment::default().failing()));
    let mut update = TaskUpdate::new();
    assert!(strategy.prepare(&task(), &mut update).await.is_err());
}

#[tokio::test]
async fn flagged_strategy_follows_account_flag() {
    let assignment = Arc::new(FakeAssignment::default().with_capable(&["d9"]));
    let strategy = FlaggedAssignmentStrategy::new(
        Arc::new(FakeFlags::enabled_for(&["acc1"])),
        assignment,
    );

    let mut flagged = task();
    flagged.pre_assigned_delegate_id = Some(delegate("d1"));
    flagged.broadcast_count = 1;
    let mut update = TaskUpdate::new();
    strategy.prepare(&flagged, &mut update).await.unwrap();
    assert_eq!(update.sets()[keys::PRE_ASSIGNED_DELEGATE_ID], "d9");

    let mut other = flagged.clone();
    other.account_id = AccountId::new("acc2");
    let mut update = TaskUpdate::new();
    strategy.prepare(&other, &mut update).await.unwrap();
    assert!(update.unsets().any(|k| k == keys::PRE_ASSIGNED_DELEGATE_ID));
    assert!(!update.sets().contains_key(keys::PRE_ASSIGNED_DELEGATE_ID));
}

#[tokio::test]
async fn mode_selects_strategy() {
    let assignment = Arc::new(FakeAssignment::default());
    let flags = Arc::new(FakeFlags::default());
    for (mode, name) in [
        (AssignmentMode::Legacy, "legacy"),
        (AssignmentMode::Capability, "capability"),
        (AssignmentMode::PerAccount, "per-account"),
    ] {
        let s = strategy::for_mode(mode, assignment.clone(), flags.clone());
        assert_eq!(s.name(), name);
    }
}

#[tokio::test]
async fn capability_rebroadcast_rotates_delegates_across_ticks() {
    let h = Harness::new(FakeAssignment::default().with_capable(&["d1", "d2"]));
    let strategy = Arc::new(CapabilityAssignmentStrategy::new(h.assignment.clone()));
    let control = h.control_plane_with(strategy);
    let t = task();
    h.store.insert(&t).await.unwrap();

    control.tick(NOW, false).await;
    let first = h.store.get(t.uuid).await.unwrap().unwrap();
    assert_eq!(first.pre_assigned_delegate_id, Some(delegate("d1")));
    assert!(first.already_tried_delegates.is_empty());

    // The recording broadcaster schedules the next round one second out.
    control.tick(NOW + 1_001, false).await;
    let second = h.store.get(t.uuid).await.unwrap().unwrap();
    assert_eq!(second.pre_assigned_delegate_id, Some(delegate("d2")));
    assert!(second.already_tried_delegates.contains(&delegate("d1")));
    assert_eq!(second.broadcast_count, 2);

    control.tick(NOW + 2_002, false).await;
    let third = h.store.get(t.uuid).await.unwrap().unwrap();
    assert!(third.pre_assigned_delegate_id.is_none());
    assert_eq!(third.already_tried_delegates.len(), 2);
    assert_eq!(h.broadcaster.broadcast().len(), 3);
}
