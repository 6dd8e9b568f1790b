use super::*;
use serial_test::serial;
use std::env;

/// These tests modify global environment variables and use #[serial] to
/// ensure they run sequentially, preventing interference between parallel
/// tests.
fn cleanup_test_env() {
    for key in [
        "API_KEY",
        "API_HOST",
        "API_PORT",
        "ALLOWED_ORIGINS",
        "MAX_SLOTS",
        "MAX_QUEUE_SIZE",
        "QUEUE_FACADE_USE_NEW",
        "QUEUE_FACADE_SHADOW_MODE",
        "QUEUE_FACADE_ROLLOUT_PERCENT",
        "LOOP_STRATEGY_MODE",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn missing_api_key_is_rejected() {
    cleanup_test_env();
    let result = Config::load();
    assert!(result.is_err(), "config without API_KEY must be rejected");
}

#[test]
#[serial]
fn blank_api_key_is_rejected() {
    cleanup_test_env();
    env::set_var("API_KEY", "   ");
    let result = Config::load();
    assert!(result.is_err());
}

#[test]
#[serial]
fn short_api_key_is_rejected() {
    cleanup_test_env();
    env::set_var("API_KEY", "too-short");
    let result = Config::load();
    assert!(result.is_err());
}

#[test]
#[serial]
fn valid_api_key_loads_with_defaults() {
    cleanup_test_env();
    env::set_var("API_KEY", "a".repeat(32));
    let config = Config::load().expect("valid key should load");

    assert_eq!(config.scheduler.max_slots, DEFAULT_MAX_SLOTS);
    assert_eq!(config.scheduler.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
    assert!(!config.scheduler.priority_mode);
    assert_eq!(config.queue_facade.rollout_percent, 0);
    assert!(!config.queue_facade.use_new_queue_system);
    assert_eq!(config.loop_strategy.default_mode, "hybrid");
    assert!(config.api.enable_auth);
}

#[test]
#[serial]
fn scheduler_overrides_are_respected() {
    cleanup_test_env();
    env::set_var("API_KEY", "b".repeat(32));
    env::set_var("MAX_SLOTS", "7");
    env::set_var("SCHEDULER_PRIORITY_MODE", "true");

    let config = Config::load().unwrap();
    assert_eq!(config.scheduler.max_slots, 7);
    assert!(config.scheduler.priority_mode);
}

#[test]
#[serial]
fn rollout_config_overrides_are_respected() {
    cleanup_test_env();
    env::set_var("API_KEY", "c".repeat(32));
    env::set_var("QUEUE_FACADE_USE_NEW", "true");
    env::set_var("QUEUE_FACADE_ROLLOUT_PERCENT", "50");

    let config = Config::load().unwrap();
    assert!(config.queue_facade.use_new_queue_system);
    assert_eq!(config.queue_facade.rollout_percent, 50);
}
