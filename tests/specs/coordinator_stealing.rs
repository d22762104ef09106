//! Stealing safety: one steal lock per victim at a time, non-owner
//! release is a no-op, and a successful steal picks the best entry.

use pi_core::{FakeClock, RuntimeConfig, RuntimeProfile};
use pi_coordinator::{
    InstanceRegistry, LockManager, QueueStateBus, RuntimeDir, StealPriority, StealableEntry,
    WorkStealer,
};
use serial_test::serial;
use std::time::Duration;

const BASE_MS: u64 = 1_700_000_000_000;

fn entry(id: &str, priority: StealPriority) -> StealableEntry {
    StealableEntry {
        id: id.to_string(),
        tool_name: "orchestrate".to_string(),
        priority,
        enqueued_at: BASE_MS,
        estimated_duration_ms: None,
        estimated_rounds: Some(3),
    }
}

#[tokio::test]
async fn steal_lock_is_exclusive_across_managers() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(BASE_MS);
    let dir = RuntimeDir::new(tmp.path());
    dir.ensure().unwrap();

    let manager_a = LockManager::new(dir.clone(), clock.clone());
    let manager_b = LockManager::new(dir.clone(), clock.clone());

    let held = manager_a
        .try_acquire("steal:victim", Duration::from_secs(30), 0)
        .await
        .unwrap();
    assert!(manager_b
        .try_acquire("steal:victim", Duration::from_secs(30), 2)
        .await
        .is_none());

    // a non-owner release must not free the lock
    let mut imposter = held.clone();
    imposter.lock_id = "not-the-owner".to_string();
    manager_b.release(&imposter);
    assert!(manager_b
        .try_acquire("steal:victim", Duration::from_secs(30), 0)
        .await
        .is_none());

    // the owner's release does
    manager_a.release(&held);
    assert!(manager_b
        .try_acquire("steal:victim", Duration::from_secs(30), 0)
        .await
        .is_some());
}

#[tokio::test]
#[serial]
async fn idle_instance_steals_best_entry_from_loaded_peer() {
    std::env::remove_var("PI_ENABLE_WORK_STEALING");
    let tmp = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(BASE_MS);
    let dir = RuntimeDir::new(tmp.path());
    let config = RuntimeConfig::for_profile(RuntimeProfile::Default);

    let idle = InstanceRegistry::new(dir.clone(), config.clone(), clock.clone());
    let loaded = InstanceRegistry::new(dir.clone(), config.clone(), clock.clone());
    idle.register("idle-session", "/idle").await.unwrap();
    let loaded_record = loaded.register("busy-session", "/busy").await.unwrap();
    loaded.set_pending_task_count(5);

    let bus = QueueStateBus::new(dir.clone(), clock.clone(), config.heartbeat_interval_ms);
    bus.publish(
        &loaded_record.instance_id,
        5,
        1,
        Some(800.0),
        vec![
            entry("background-job", StealPriority::Background),
            entry("urgent-job", StealPriority::Critical),
        ],
    )
    .unwrap();

    let stealer = WorkStealer::new(idle.clone(), bus, clock);
    assert!(stealer.is_idle());
    let stolen = stealer.safe_steal_work().await.unwrap();
    assert_eq!(stolen.from_instance, loaded_record.instance_id);
    assert_eq!(stolen.entry.id, "urgent-job");

    // the steal lock is released afterwards
    let manager = LockManager::new(dir, FakeClock::at(BASE_MS));
    assert!(manager
        .try_acquire(
            &format!("steal:{}", loaded_record.instance_id),
            Duration::from_secs(1),
            0
        )
        .await
        .is_some());

    idle.unregister().await;
    loaded.unregister().await;
}
