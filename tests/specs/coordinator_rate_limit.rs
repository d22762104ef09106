//! Scenario: two concurrent instances share totalMaxLlm=6. Each gets an
//! even share; a 429 halves one instance's learned model limit, and
//! recovery afterwards is strictly monotone back toward the preset.

use pi_core::{FakeClock, RuntimeConfig, RuntimeProfile};
use pi_coordinator::{AdaptiveModelLimiter, InstanceRegistry, RuntimeDir};

fn shared_config() -> RuntimeConfig {
    // stable profile: reduction 0.5, recovery 1.05, interval 120s
    let mut config = RuntimeConfig::for_profile(RuntimeProfile::Stable);
    config.total_max_llm = 6;
    config
}

#[tokio::test]
async fn shared_budget_splits_and_learned_limit_recovers_monotonically() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(1_700_000_000_000);
    let dir = RuntimeDir::new(tmp.path());

    let instance_a = InstanceRegistry::new(dir.clone(), shared_config(), clock.clone());
    let instance_b = InstanceRegistry::new(dir.clone(), shared_config(), clock.clone());
    instance_a.register("session-a", "/work/a").await.unwrap();
    instance_b.register("session-b", "/work/b").await.unwrap();

    // both instances have active work
    instance_a.add_active_llm(1);
    instance_b.add_active_llm(1);

    assert_eq!(instance_a.get_contending_instance_count(), 2);
    assert_eq!(instance_b.get_contending_instance_count(), 2);
    assert_eq!(instance_a.get_my_parallel_limit(), 3); // 6 / 2
    assert_eq!(instance_b.get_my_parallel_limit(), 3);

    // instance A gets throttled on (anthropic, claude-x), preset 4
    let limiter = AdaptiveModelLimiter::new(&shared_config(), clock.clone());
    assert_eq!(limiter.learned_limit("anthropic", "claude-x", 4), 4);
    let shrunk = limiter.record_rate_limit("anthropic", "claude-x", 4);
    assert_eq!(shrunk, 2); // halved

    // inside the 429 window the learned limit never rises
    for _ in 0..5 {
        limiter.record_success("anthropic", "claude-x");
        assert_eq!(limiter.learned_limit("anthropic", "claude-x", 4), 2);
    }

    // after each quiet recovery interval, growth is strictly monotone
    let mut previous = 2;
    loop {
        clock.advance_ms(120_000);
        limiter.record_success("anthropic", "claude-x");
        let current = limiter.learned_limit("anthropic", "claude-x", 4);
        assert!(current >= previous, "learned limit regressed: {current} < {previous}");
        if current == 4 {
            break;
        }
        assert!(current > previous, "recovery stalled below the preset");
        previous = current;
    }

    // effective limit also respects the cluster share for the model
    instance_a.set_active_model("anthropic", "claude-x");
    instance_b.set_active_model("anthropic", "claude-x");
    let share = instance_a.get_model_parallel_limit("anthropic", "claude-x", 4);
    assert_eq!(share, 2); // 4 / 2 users
    assert_eq!(limiter.effective_limit("anthropic", "claude-x", 4, share), 2);

    instance_a.unregister().await;
    instance_b.unregister().await;
}

#[tokio::test]
async fn unregistered_peer_frees_its_share() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(1_700_000_000_000);
    let dir = RuntimeDir::new(tmp.path());

    let instance_a = InstanceRegistry::new(dir.clone(), shared_config(), clock.clone());
    let instance_b = InstanceRegistry::new(dir.clone(), shared_config(), clock.clone());
    instance_a.register("session-a", "/work/a").await.unwrap();
    instance_b.register("session-b", "/work/b").await.unwrap();
    instance_a.add_active_llm(1);
    instance_b.add_active_llm(1);
    assert_eq!(instance_a.get_my_parallel_limit(), 3);

    instance_b.unregister().await;
    assert_eq!(instance_a.get_contending_instance_count(), 1);
    assert_eq!(instance_a.get_my_parallel_limit(), 6);

    instance_a.unregister().await;
}
