// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pi_core::FakeClock;

const HEARTBEAT_MS: u64 = 3_000;

fn bus(tmp: &tempfile::TempDir) -> (QueueStateBus<FakeClock>, FakeClock) {
    let clock = FakeClock::at(100_000);
    let dir = RuntimeDir::new(tmp.path());
    dir.ensure().unwrap();
    (QueueStateBus::new(dir, clock.clone(), HEARTBEAT_MS), clock)
}

fn entry(id: &str, priority: StealPriority, enqueued_at: u64) -> StealableEntry {
    StealableEntry {
        id: id.to_string(),
        tool_name: "orchestrate".to_string(),
        priority,
        enqueued_at,
        estimated_duration_ms: None,
        estimated_rounds: None,
    }
}

#[test]
fn publish_then_read_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, _clock) = bus(&tmp);

    bus.publish("peer-1", 3, 1, Some(120.5), vec![entry("t1", StealPriority::Normal, 5)])
        .unwrap();

    let peers = bus.read_peers("me");
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].instance_id, "peer-1");
    assert_eq!(peers[0].pending_task_count, 3);
    assert_eq!(peers[0].stealable_entries[0].id, "t1");
}

#[test]
fn own_snapshot_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, _clock) = bus(&tmp);

    bus.publish("me", 3, 0, None, Vec::new()).unwrap();
    assert!(bus.read_peers("me").is_empty());
}

#[test]
fn stale_snapshot_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, clock) = bus(&tmp);

    bus.publish("peer-1", 1, 0, None, Vec::new()).unwrap();
    clock.advance_ms(HEARTBEAT_MS * 2 + 1);
    assert!(bus.read_peers("me").is_empty());
}

#[test]
fn snapshot_at_exactly_twice_interval_still_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, clock) = bus(&tmp);

    bus.publish("peer-1", 1, 0, None, Vec::new()).unwrap();
    clock.advance_ms(HEARTBEAT_MS * 2);
    assert_eq!(bus.read_peers("me").len(), 1);
}

#[test]
fn corrupt_snapshot_is_unlinked() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, _clock) = bus(&tmp);

    let path = tmp.path().join("queue-states/garbage.json");
    std::fs::write(&path, "{{{").unwrap();
    assert!(bus.read_peers("me").is_empty());
    assert!(!path.exists());
}

#[test]
fn entries_are_priority_ordered_and_capped() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, _clock) = bus(&tmp);

    let mut entries = vec![
        entry("bg", StealPriority::Background, 1),
        entry("crit", StealPriority::Critical, 9),
        entry("norm", StealPriority::Normal, 4),
        entry("high", StealPriority::High, 2),
    ];
    for i in 0..30 {
        entries.push(entry(&format!("low-{i}"), StealPriority::Low, 10 + i));
    }
    bus.publish("peer-1", 0, 0, None, entries).unwrap();

    let peers = bus.read_peers("me");
    let published = &peers[0].stealable_entries;
    assert_eq!(published.len(), MAX_STEALABLE_ENTRIES);
    assert_eq!(published[0].id, "crit");
    assert_eq!(published[1].id, "high");
    assert_eq!(published[2].id, "norm");
    // background entry fell off the end of the cap
    assert!(published.iter().all(|e| e.id != "bg"));
}

#[test]
fn remote_capacity_requires_idle_peer() {
    let tmp = tempfile::tempdir().unwrap();
    let (bus, _clock) = bus(&tmp);

    bus.publish("busy", 5, 3, None, Vec::new()).unwrap();
    assert!(!bus.check_remote_capacity("me"));

    bus.publish("idle", 0, 1, None, Vec::new()).unwrap();
    assert!(bus.check_remote_capacity("me"));
}

#[test]
fn priority_serializes_lowercase() {
    let json = serde_json::to_string(&StealPriority::Background).unwrap();
    assert_eq!(json, "\"background\"");
}
