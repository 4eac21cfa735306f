use forge_dispatch::config::{ConfigError, ConfigLoader, Deployment};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

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
    unsafe {
        env::remove_var("DISPATCH_PROFILE");
        env::remove_var("DISPATCH_API_BIND_ADDR");
        env::remove_var("DISPATCH_LOG_LEVEL");
        env::remove_var("DISPATCH_DEPLOYMENT");
        env::remove_var("DISPATCH_WEBHOOK_GITHUB_SECRET");
        env::remove_var("DISPATCH_TESTING_FARM_SECRET");
        env::remove_var("DISPATCH_WORKER_CONCURRENCY");
        env::remove_var("DISPATCH_ADMINS");
        env::remove_var("DISPATCH_REQUIRE_APPROVAL");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader_for(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader_for(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.deployment, Deployment::Stg);
    assert!(cfg.validate_webhooks);
    assert!(!cfg.require_approval);
    assert_eq!(cfg.koji_hub_url, "https://koji.fedoraproject.org/kojihub");
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "DISPATCH_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "DISPATCH_API_BIND_ADDR=192.168.0.10:5000\nDISPATCH_DEPLOYMENT=prod\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "DISPATCH_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "DISPATCH_PROFILE=test\nDISPATCH_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = loader_for(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.deployment, Deployment::Prod);
    assert_eq!(cfg.deployment.check_prefix(), "packit");
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
        "DISPATCH_API_BIND_ADDR=127.0.0.1:3000\nDISPATCH_ADMINS=alice\n",
    );

    unsafe {
        env::set_var("DISPATCH_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("DISPATCH_ADMINS", "alice, bob");
        env::set_var("DISPATCH_REQUIRE_APPROVAL", "yes");
    }

    let cfg = loader_for(&temp_dir)
        .load()
        .expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert!(cfg.is_admin("bob"));
    assert!(cfg.require_approval);

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("DISPATCH_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = loader_for(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn production_profile_requires_webhook_secrets() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "DISPATCH_PROFILE=prod\n");

    let err = loader_for(&temp_dir)
        .load()
        .expect_err("prod without secrets should fail");
    assert!(matches!(
        err,
        ConfigError::MissingWebhookSecret {
            key: "WEBHOOK_GITHUB_SECRET"
        }
    ));

    unsafe {
        env::set_var("DISPATCH_WEBHOOK_GITHUB_SECRET", "s3cret");
        env::set_var("DISPATCH_TESTING_FARM_SECRET", "tf");
    }
    let cfg = loader_for(&temp_dir).load().expect("secrets satisfy prod");
    assert_eq!(cfg.profile, "prod");

    clear_env();
}

#[test]
fn out_of_range_worker_concurrency_is_rejected() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("DISPATCH_WORKER_CONCURRENCY", "0");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = loader_for(&temp_dir)
        .load()
        .expect_err("zero workers should fail");
    assert!(matches!(
        err,
        ConfigError::InvalidWorkerConcurrency { value: 0 }
    ));

    clear_env();
}
