use billing_sync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const VALID_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("BILLSYNC_"))
        .collect();
    for key in keys {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader_in(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_only_key_present() {
    let _guard = env_guard();
    clear_env();
    unsafe {
        env::set_var("BILLSYNC_CRYPTO_KEY", VALID_KEY);
    }

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader_in(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.crypto_key.as_deref().map(<[u8]>::len), Some(32));
    assert!(cfg.operator_tokens.is_empty());
    assert_eq!(cfg.sync.orphan_threshold_seconds, 3600);
    assert_eq!(cfg.fetch.max_attempts, 3);
    cfg.bind_addr().expect("default bind addr parses");
    assert!(cfg.require_operator_tokens().is_err());
    clear_env();
}

#[test]
fn missing_crypto_key_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let err = loader_in(&temp_dir).load().expect_err("key is required");
    assert!(matches!(err, ConfigError::MissingCryptoKey));
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "BILLSYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "BILLSYNC_API_BIND_ADDR=192.168.0.10:5000\nBILLSYNC_FETCH_MAX_ATTEMPTS=5\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "BILLSYNC_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "BILLSYNC_PROFILE=test\nBILLSYNC_API_BIND_ADDR=127.0.0.1:4000\nBILLSYNC_CRYPTO_KEY={VALID_KEY}\n"
        ),
    );

    let cfg = loader_in(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.fetch.max_attempts, 5);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("BILLSYNC_API_BIND_ADDR=127.0.0.1:3000\nBILLSYNC_CRYPTO_KEY={VALID_KEY}\n"),
    );

    unsafe {
        env::set_var("BILLSYNC_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let cfg = loader_in(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");

    clear_env();
}

#[test]
fn operator_tokens_accept_list_or_single_value() {
    let _guard = env_guard();
    clear_env();
    unsafe {
        env::set_var("BILLSYNC_CRYPTO_KEY", VALID_KEY);
        env::set_var("BILLSYNC_OPERATOR_TOKENS", "first, second,,");
    }

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader_in(&temp_dir).load().expect("config loads");
    assert_eq!(cfg.operator_tokens, vec!["first", "second"]);
    cfg.require_operator_tokens().expect("tokens present");

    unsafe {
        env::remove_var("BILLSYNC_OPERATOR_TOKENS");
        env::set_var("BILLSYNC_OPERATOR_TOKEN", "only-one");
    }
    let cfg = loader_in(&temp_dir).load().expect("config loads");
    assert_eq!(cfg.operator_tokens, vec!["only-one"]);

    clear_env();
}

#[test]
fn out_of_range_sweep_settings_are_rejected() {
    let _guard = env_guard();
    clear_env();
    unsafe {
        env::set_var("BILLSYNC_CRYPTO_KEY", VALID_KEY);
        env::set_var("BILLSYNC_ORPHAN_THRESHOLD_SECONDS", "30");
    }

    let temp_dir = TempDir::new().unwrap();
    let err = loader_in(&temp_dir).load().expect_err("threshold too small");
    assert!(matches!(err, ConfigError::InvalidOrphanThreshold { value: 30 }));

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("BILLSYNC_API_BIND_ADDR", "not-an-addr");
        env::set_var("BILLSYNC_CRYPTO_KEY", VALID_KEY);
    }
    let temp_dir = TempDir::new().unwrap();
    let err = loader_in(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn short_crypto_key_is_rejected() {
    let _guard = env_guard();
    clear_env();
    unsafe {
        // "short" in base64
        env::set_var("BILLSYNC_CRYPTO_KEY", "c2hvcnQ=");
    }

    let temp_dir = TempDir::new().unwrap();
    let err = loader_in(&temp_dir).load().expect_err("key too short");
    assert!(matches!(err, ConfigError::InvalidCryptoKeyLength { length: 5 }));

    clear_env();
}
