// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pi_core::FakeClock;
use yare::parameterized;

fn manager(tmp: &tempfile::TempDir) -> (LockManager<FakeClock>, FakeClock) {
    let clock = FakeClock::at(1_000_000);
    let dir = RuntimeDir::new(tmp.path());
    dir.ensure().unwrap();
    (LockManager::new(dir, clock.clone()), clock)
}

#[tokio::test]
async fn acquire_creates_lock_file_with_record() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, clock) = manager(&tmp);

    let lock = locks
        .try_acquire("steal:sess-1", Duration::from_secs(30), 3)
        .await
        .unwrap();
    assert_eq!(lock.resource, "steal:sess-1");
    assert_eq!(lock.expires_at, clock.epoch_ms() + 30_000);

    let path = tmp.path().join("locks/steal_sess-1.lock");
    let on_disk: DistributedLock =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(on_disk, lock);
}

#[tokio::test]
async fn second_acquire_fails_while_held() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, _clock) = manager(&tmp);

    let _held = locks
        .try_acquire("res", Duration::from_secs(30), 0)
        .await
        .unwrap();
    assert!(locks.try_acquire("res", Duration::from_secs(30), 2).await.is_none());
}

#[tokio::test]
async fn expired_lock_is_taken_over() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, clock) = manager(&tmp);

    let first = locks
        .try_acquire("res", Duration::from_secs(10), 0)
        .await
        .unwrap();
    clock.advance_ms(10_001);
    let second = locks
        .try_acquire("res", Duration::from_secs(10), 1)
        .await
        .unwrap();
    assert_ne!(first.lock_id, second.lock_id);
}

#[tokio::test]
async fn release_by_owner_removes_file() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, _clock) = manager(&tmp);

    let lock = locks
        .try_acquire("res", Duration::from_secs(10), 0)
        .await
        .unwrap();
    locks.release(&lock);
    assert!(!tmp.path().join("locks/res.lock").exists());
}

#[tokio::test]
async fn release_by_non_owner_is_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, clock) = manager(&tmp);

    let held = locks
        .try_acquire("res", Duration::from_secs(10), 0)
        .await
        .unwrap();
    let imposter = DistributedLock {
        lock_id: "someone-else".to_string(),
        acquired_at: clock.epoch_ms(),
        expires_at: clock.epoch_ms() + 10_000,
        resource: "res".to_string(),
    };
    locks.release(&imposter);
    assert!(tmp.path().join("locks/res.lock").exists());
    locks.release(&held);
}

#[tokio::test]
async fn cleanup_sweeps_only_expired() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, clock) = manager(&tmp);

    let _short = locks
        .try_acquire("short", Duration::from_secs(1), 0)
        .await
        .unwrap();
    let _long = locks
        .try_acquire("long", Duration::from_secs(600), 0)
        .await
        .unwrap();

    clock.advance_ms(2_000);
    locks.cleanup_expired();

    assert!(!tmp.path().join("locks/short.lock").exists());
    assert!(tmp.path().join("locks/long.lock").exists());
}

#[tokio::test]
async fn corrupt_lock_file_is_reaped_on_contention() {
    let tmp = tempfile::tempdir().unwrap();
    let (locks, _clock) = manager(&tmp);

    std::fs::write(tmp.path().join("locks/res.lock"), "not json").unwrap();
    let lock = locks.try_acquire("res", Duration::from_secs(10), 1).await;
    assert!(lock.is_some());
}

#[parameterized(
    slashes = { "a/b/c", "a_b_c" },
    colons = { "steal:sess-1", "steal_sess-1" },
    backslash = { r"a\b", "a_b" },
    plain = { "plain-name", "plain-name" },
)]
fn escape_resource_cases(input: &str, expected: &str) {
    assert_eq!(escape_resource(input), expected);
}

#[test]
fn expiry_is_inclusive() {
    let lock = DistributedLock {
        lock_id: "x".to_string(),
        acquired_at: 0,
        expires_at: 100,
        resource: "r".to_string(),
    };
    assert!(!lock.is_expired(99));
    assert!(lock.is_expired(100));
}
