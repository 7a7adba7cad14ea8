use livestate_sync::{Backoff, EngineConfig, EngineError, ReconnectConfig};
use livestate_types::{Graph, Sankey, Surface};
use std::io::Write;
use std::time::Duration;

#[test]
fn defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.update_interval, Duration::from_millis(1000));
    assert_eq!(config.batch_size, 10);
    assert!(config.throttle_updates);
    assert_eq!(config.throttle_interval, Duration::from_millis(200));
    assert_eq!(config.max_entities, 1000);
    assert_eq!(config.max_relations, 2000);
    assert_eq!(config.ttl, None);
    assert!(config.reconnect.auto_reconnect);
    assert_eq!(config.reconnect.reconnect_interval, Duration::from_millis(5000));
    assert_eq!(config.reconnect.max_reconnect_attempts, Some(10));
}

#[test]
fn schema_defaults() {
    let graph = EngineConfig::for_schema::<Graph>("ws://g");
    assert_eq!(graph.url, "ws://g");
    assert_eq!(graph.ttl, Some(Duration::from_secs(300)));

    let sankey = EngineConfig::for_schema::<Sankey>("ws://s");
    assert_eq!((sankey.max_entities, sankey.max_relations), (100, 200));

    let surface = EngineConfig::for_schema::<Surface>("ws://p");
    assert_eq!(surface.batch_size, 20);
}

#[test]
fn camel_case_json_with_partial_fields() {
    let config = EngineConfig::from_json_str(
        r#"{"url": "ws://x", "batchSize": 5, "throttleInterval": 50, "ttl": 30,
            "autoReconnect": false, "backoff": "exponential", "maxReconnectAttempts": null}"#,
    )
    .unwrap();
    assert_eq!(config.url, "ws://x");
    assert_eq!(config.batch_size, 5);
    assert_eq!(config.throttle_interval, Duration::from_millis(50));
    assert_eq!(config.update_interval, Duration::from_millis(1000));
    assert_eq!(config.ttl, Some(Duration::from_secs(30)));
    assert!(!config.reconnect.auto_reconnect);
    assert_eq!(config.reconnect.backoff, Backoff::Exponential);
    assert_eq!(config.reconnect.max_reconnect_attempts, None);
}

#[test]
fn zero_batch_size_is_rejected() {
    let err = EngineConfig::from_json_str(r#"{"batchSize": 0}"#).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"url": "ws://file", "maxEntities": 3}}"#).unwrap();
    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.url, "ws://file");
    assert_eq!(config.max_entities, 3);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, EngineError::Io(_)));
}

// ── Reconnect policy ─────────────────────────────────────────────

#[test]
fn fixed_backoff() {
    let policy = ReconnectConfig::default();
    assert_eq!(policy.delay_for(1), Duration::from_millis(5000));
    assert_eq!(policy.delay_for(7), Duration::from_millis(5000));
}

#[test]
fn exponential_backoff_is_capped() {
    let policy = ReconnectConfig {
        backoff: Backoff::Exponential,
        reconnect_interval: Duration::from_secs(1),
        max_reconnect_interval: Duration::from_secs(10),
        ..ReconnectConfig::default()
    };
    let delays: Vec<_> = (1..=6).map(|n| policy.delay_for(n).as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    assert_eq!(policy.delay_for(500), Duration::from_secs(10));
}

#[test]
fn jitter_stays_within_half_to_full() {
    let policy = ReconnectConfig {
        jitter: true,
        ..ReconnectConfig::default()
    };
    for attempt in 1..50 {
        let delay = policy.delay_for(attempt);
        assert!(delay >= Duration::from_millis(2500) && delay <= Duration::from_millis(5000));
    }
}

#[test]
fn attempt_cap() {
    let capped = ReconnectConfig {
        max_reconnect_attempts: Some(2),
        ..ReconnectConfig::default()
    };
    assert!(capped.allows(2));
    assert!(!capped.allows(3));

    let unbounded = ReconnectConfig {
        max_reconnect_attempts: None,
        ..ReconnectConfig::default()
    };
    assert!(unbounded.allows(u32::MAX));

    let disabled = ReconnectConfig {
        auto_reconnect: false,
        ..ReconnectConfig::default()
    };
    assert!(!disabled.allows(1));
}

#[test]
fn serializes_back_to_camel_case() {
    let value = serde_json::to_value(EngineConfig::for_schema::<Graph>("ws://g")).unwrap();
    assert_eq!(value["updateInterval"], 1000);
    assert_eq!(value["ttl"], 300);
    assert_eq!(value["reconnectInterval"], 5000);
    assert_eq!(value["backoff"], "fixed");
}
