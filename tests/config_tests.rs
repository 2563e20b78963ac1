#![allow(clippy::unwrap_used, clippy::expect_used)]

use brrtpipe::runtime_config::parse_stack_size;
use brrtpipe::{BackpressureMode, ConfigError, Dispatcher, DispatcherConfig};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

// These tests are affected by global env vars. Use a mutex to serialize access.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const ENV_KEYS: [&str; 4] = [
    "BRRTP_QUEUE_CAPACITY",
    "BRRTP_ADMISSION_TIMEOUT_MS",
    "BRRTP_BACKPRESSURE_MODE",
    "BRRTP_STACK_SIZE",
];

fn clean_env_vars() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn config_file(extension: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_from_env_defaults() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env_vars();

    assert_eq!(DispatcherConfig::from_env(), DispatcherConfig::default());
}

#[test]
fn test_from_env_overrides() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env_vars();

    std::env::set_var("BRRTP_QUEUE_CAPACITY", "0");
    std::env::set_var("BRRTP_ADMISSION_TIMEOUT_MS", "75");
    std::env::set_var("BRRTP_BACKPRESSURE_MODE", "Shed");
    std::env::set_var("BRRTP_STACK_SIZE", "0x8000");

    let config = DispatcherConfig::from_env();
    clean_env_vars();

    assert_eq!(config.queue_capacity, 0);
    assert_eq!(config.admission_timeout(), Duration::from_millis(75));
    assert_eq!(config.backpressure_mode, BackpressureMode::Shed);
    assert_eq!(config.stack_size, 0x8000);
}

#[test]
fn test_from_env_ignores_garbage() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env_vars();

    std::env::set_var("BRRTP_QUEUE_CAPACITY", "lots");
    std::env::set_var("BRRTP_BACKPRESSURE_MODE", "panic");
    std::env::set_var("BRRTP_STACK_SIZE", "0xZZ");

    let config = DispatcherConfig::from_env();
    clean_env_vars();

    assert_eq!(config, DispatcherConfig::default());
}

#[test]
fn test_from_env_ignores_tiny_stack_size() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env_vars();

    std::env::set_var("BRRTP_STACK_SIZE", "64");
    let config = DispatcherConfig::from_env();
    clean_env_vars();

    assert_eq!(config.stack_size, DispatcherConfig::default().stack_size);
    assert!(config.validate().is_ok());
}

#[test]
fn test_yaml_file() {
    let file = config_file(
        "yaml",
        "queue_capacity: 16\nadmission_timeout_ms: 250\nbackpressure_mode: shed\n",
    );
    let config = DispatcherConfig::from_file(file.path()).unwrap();
    assert_eq!(config.queue_capacity, 16);
    assert_eq!(config.admission_timeout_ms, 250);
    assert_eq!(config.backpressure_mode, BackpressureMode::Shed);
    assert_eq!(config.stack_size, 0x10000);
}

#[test]
fn test_toml_file() {
    let file = config_file("toml", "queue_capacity = 2\nstack_size = 16384\n");
    let config = DispatcherConfig::from_file(file.path()).unwrap();
    assert_eq!(config.queue_capacity, 2);
    assert_eq!(config.stack_size, 16384);
    assert_eq!(config.backpressure_mode, BackpressureMode::Block);
}

#[test]
fn test_json_file() {
    let file = config_file("json", r#"{"admission_timeout_ms": 10}"#);
    let config = DispatcherConfig::from_file(file.path()).unwrap();
    assert_eq!(config.admission_timeout_ms, 10);
    assert_eq!(config.queue_capacity, 1024);
}

#[test]
fn test_file_errors() {
    let missing = DispatcherConfig::from_file("/definitely/not/here.yaml").unwrap_err();
    assert!(matches!(missing, ConfigError::Io { .. }));
    assert!(std::error::Error::source(&missing).is_some());

    let ini = config_file("ini", "queue_capacity=1");
    assert!(matches!(
        DispatcherConfig::from_file(ini.path()),
        Err(ConfigError::UnsupportedFormat { .. })
    ));

    let broken = config_file("yaml", "queue_capacity: [1, 2");
    assert!(matches!(
        DispatcherConfig::from_file(broken.path()),
        Err(ConfigError::Parse { .. })
    ));

    let bad_mode = config_file("toml", "backpressure_mode = \"drop\"");
    assert!(matches!(
        DispatcherConfig::from_file(bad_mode.path()),
        Err(ConfigError::Parse { .. })
    ));

    let tiny_stack = config_file("json", r#"{"stack_size": 64}"#);
    let err = DispatcherConfig::from_file(tiny_stack.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("stack_size"));
}

#[test]
fn test_env_applies_on_top_of_file() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env_vars();

    let file = config_file("yaml", "queue_capacity: 16\nadmission_timeout_ms: 250\n");
    std::env::set_var("BRRTP_QUEUE_CAPACITY", "4");
    let config = DispatcherConfig::from_file(file.path()).unwrap().apply_env();
    clean_env_vars();

    assert_eq!(config.queue_capacity, 4);
    assert_eq!(config.admission_timeout_ms, 250);
}

#[test]
fn test_parse_stack_size_forms() {
    assert_eq!(parse_stack_size(" 0x10000 "), Some(65536));
    assert_eq!(parse_stack_size("4096"), Some(4096));
    assert_eq!(parse_stack_size("-1"), None);
}

#[test]
fn test_dispatcher_uses_config() {
    let config = DispatcherConfig {
        queue_capacity: 3,
        admission_timeout_ms: 15,
        ..DispatcherConfig::default()
    };
    let dispatcher: Dispatcher<u32> = Dispatcher::with_config(config.clone());
    assert_eq!(dispatcher.capacity(), 3);
    assert_eq!(dispatcher.config(), &config);
}
