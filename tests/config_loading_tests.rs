/// 配置加载测试：文件格式、环境变量覆盖与校验
use std::env;
use std::fs;

use resource_layer::infrastructure::{LogFormat, ResourceConfig};
use resource_layer::ResourceError;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_toml_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "layer.toml",
        r#"
[cache]
maxEntries = 250
defaultTtlMs = 0

[pool]
minConnections = 2
maxConnections = 4

[commandCache.operationTtlMs]
next = 5000

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = ResourceConfig::from_file(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.cache.max_entries, 250);
    assert_eq!(config.cache.default_ttl(), None);
    assert_eq!(config.pool.min_connections, 2);
    assert_eq!(config.pool.max_connections, 4);
    assert_eq!(config.command_cache.operation_ttl_ms.get("next"), Some(&5000));
    assert_eq!(config.logging.format, LogFormat::Json);
    // Untouched sections keep their defaults
    assert_eq!(config.batch.max_batch_size, 10);
}

#[test]
fn test_yaml_and_json_files() {
    let dir = TempDir::new().unwrap();
    let yaml = write(
        &dir,
        "layer.yaml",
        "batch:\n  maxBatchSize: 25\nmemory:\n  warningThreshold: 0.5\n",
    );
    let json = write(&dir, "layer.json", r#"{ "orchestrator": { "defaultPriority": 7 } }"#);

    let from_yaml = ResourceConfig::from_file(&yaml).unwrap();
    assert_eq!(from_yaml.batch.max_batch_size, 25);
    assert!((from_yaml.memory.warning_threshold - 0.5).abs() < f64::EPSILON);

    let from_json = ResourceConfig::from_file(&json).unwrap();
    assert_eq!(from_json.orchestrator.default_priority, 7);
}

#[test]
fn test_invalid_values_fail_validation() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "bad.toml", "[memory]\nwarningThreshold = 0.95\ncriticalThreshold = 0.9\n");

    let err = ResourceConfig::load(Some(&path)).unwrap_err();
    match err {
        ResourceError::Validation { field, .. } => {
            assert_eq!(field.as_deref(), Some("memory.warningThreshold"))
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_malformed_file_is_a_validation_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.toml", "[cache\nmaxEntries = ");
    assert!(matches!(
        ResourceConfig::from_file(&path),
        Err(ResourceError::Validation { .. })
    ));
}

#[test]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "layer.toml", "[batch]\nretryDelayMs = 100\n");

    env::set_var("RESOURCE_LAYER_BATCH_RETRY_DELAY_MS", "250");
    let loaded = ResourceConfig::load(Some(&path));
    env::remove_var("RESOURCE_LAYER_BATCH_RETRY_DELAY_MS");

    assert_eq!(loaded.unwrap().batch.retry_delay_ms, 250);
}

#[test]
fn test_effective_config_round_trips_through_toml() {
    let config = ResourceConfig::default();
    let rendered = config.to_toml().unwrap();
    assert!(rendered.contains("maxEntries"));

    let dir = TempDir::new().unwrap();
    let path = write(&dir, "effective.toml", &rendered);
    let reloaded = ResourceConfig::from_file(&path).unwrap();
    assert_eq!(reloaded.cache.max_entries, config.cache.max_entries);
    assert_eq!(reloaded.orchestrator.read_operations, config.orchestrator.read_operations);
}
