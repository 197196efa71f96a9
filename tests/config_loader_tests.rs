use hexoteams::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const KEYS: &[&str] = &[
    "PROFILE",
    "APP_PORT",
    "AUTH_JWT_SECRET",
    "REDIS_URL",
    "S3_BUCKET_NAME",
    "S3_ENDPOINT_URL",
    "S3_USE_SSL",
    "AWS_REGION",
    "WORKER_CONCURRENCY",
    "MAX_SUBTASK_DEPTH",
];

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
    for key in KEYS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    let cfg = loader(&dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.app_port, 8002);
    assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6379/0"));
    assert_eq!(cfg.storage.bucket_name, "team-management");
    assert_eq!(cfg.storage.region, "us-east-1");
    assert!(cfg.storage.use_ssl);
    assert_eq!(cfg.max_subtask_depth, 3);
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "APP_PORT=9001\nS3_BUCKET_NAME=base\n");
    write_env_file(&dir, ".env.local", "PROFILE=test\nAPP_PORT=9002\n");
    write_env_file(&dir, ".env.test", "APP_PORT=9003\nS3_BUCKET_NAME=from-test\n");
    write_env_file(&dir, ".env.test.local", "APP_PORT=9004\n");

    let cfg = loader(&dir).load().expect("config loads with layered files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.app_port, 9004);
    assert_eq!(cfg.storage.bucket_name, "from-test");
}

#[test]
fn process_environment_wins_over_env_files() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "S3_ENDPOINT_URL=http://localhost:9000\nS3_USE_SSL=true\nAWS_REGION=eu-west-1\n",
    );
    unsafe {
        env::set_var("S3_ENDPOINT_URL", "http://minio:9000/");
        env::set_var("S3_USE_SSL", "false");
    }

    let cfg = loader(&dir).load().expect("config loads with env override");
    clear_env();

    assert_eq!(cfg.storage.endpoint_url.as_deref(), Some("http://minio:9000"));
    assert!(!cfg.storage.use_ssl);
    assert_eq!(cfg.storage.region, "eu-west-1");
}

#[test]
fn empty_and_unparsable_values_fall_back_to_defaults() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "APP_PORT=\nWORKER_CONCURRENCY=lots\nREDIS_URL=\n");

    let cfg = loader(&dir).load().expect("config loads");

    assert_eq!(cfg.app_port, 8002);
    assert_eq!(cfg.worker.concurrency, 4);
    assert_eq!(cfg.redis_url, None, "empty REDIS_URL disables the broker");
}

#[test]
fn production_profile_requires_jwt_secret() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "PROFILE=prod\n");
    assert!(loader(&dir).load().is_err());

    write_env_file(&dir, ".env", "PROFILE=prod\nAUTH_JWT_SECRET=s3cret\n");
    let cfg = loader(&dir).load().expect("config loads with secret");
    assert_eq!(cfg.auth_jwt_secret.as_deref(), Some("s3cret"));
}
