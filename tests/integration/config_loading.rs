//! Layered configuration loading: defaults, global file, explicit file, environment.

use std::fs;
use std::sync::Mutex;

use fasync::config::{ConfigLoader, FasyncConfig};
use tempfile::TempDir;

/// Serializes tests that touch process environment variables.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Point XDG_CONFIG_HOME at `dir` for the duration of `f`, clearing FASYNC__ overrides.
fn with_config_home<F: FnOnce()>(dir: &std::path::Path, f: F) {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let original = std::env::var("XDG_CONFIG_HOME").ok();
    std::env::set_var("XDG_CONFIG_HOME", dir);

    f();

    match original {
        Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
}

fn write_global(dir: &std::path::Path, contents: &str) {
    let config_dir = dir.join("fasync");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_defaults_without_any_file() {
    let temp_dir = TempDir::new().unwrap();
    with_config_home(temp_dir.path(), || {
        let config = ConfigLoader::load(None).unwrap();
        let defaults = FasyncConfig::default();
        assert_eq!(config.runtime, defaults.runtime);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    });
}

#[test]
fn test_global_file_is_picked_up() {
    let temp_dir = TempDir::new().unwrap();
    write_global(temp_dir.path(), "[runtime]\nworker_threads = 2\n");
    with_config_home(temp_dir.path(), || {
        assert_eq!(
            ConfigLoader::global_config_path().unwrap(),
            temp_dir.path().join("fasync").join("config.toml")
        );
        let config = ConfigLoader::load(None).unwrap();
        assert_eq!(config.runtime.worker_threads, Some(2));
        assert_eq!(config.runtime.thread_name, "fasync-worker");
    });
}

#[test]
fn test_explicit_file_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    write_global(
        temp_dir.path(),
        "[runtime]\nworker_threads = 2\n\n[logging]\nlevel = \"warn\"\n",
    );
    let explicit = temp_dir.path().join("explicit.toml");
    fs::write(&explicit, "[runtime]\nworker_threads = 6\n").unwrap();

    with_config_home(temp_dir.path(), || {
        let config = ConfigLoader::load(Some(&explicit)).unwrap();
        assert_eq!(config.runtime.worker_threads, Some(6));
        assert_eq!(config.logging.level, "warn");
    });
}

#[test]
fn test_environment_overrides_files() {
    let temp_dir = TempDir::new().unwrap();
    write_global(temp_dir.path(), "[runtime]\nmax_steps_per_slice = 10\n");
    with_config_home(temp_dir.path(), || {
        std::env::set_var("FASYNC__RUNTIME__MAX_STEPS_PER_SLICE", "77");
        let config = ConfigLoader::load(None);
        std::env::remove_var("FASYNC__RUNTIME__MAX_STEPS_PER_SLICE");
        assert_eq!(config.unwrap().runtime.max_steps_per_slice, 77);
    });
}

#[test]
fn test_missing_explicit_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    with_config_home(temp_dir.path(), || {
        let missing = temp_dir.path().join("nope.toml");
        assert!(ConfigLoader::load(Some(&missing)).is_err());
    });
}

#[test]
fn test_loaded_invalid_config_fails_validation() {
    let temp_dir = TempDir::new().unwrap();
    let explicit = temp_dir.path().join("bad.toml");
    fs::write(
        &explicit,
        "[runtime]\nworker_threads = 0\n\n[logging]\noutput = \"syslog\"\n",
    )
    .unwrap();
    let config = ConfigLoader::load_from_file(&explicit).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
}
