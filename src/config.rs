use std::env;
use std::time::Duration;

/// All tunables from the Configuration table, read once at startup.
/// Same discipline as `squall::config::Config::from_env`: every key has a
/// documented default and a missing optional value only ever produces
/// a `tracing::warn!`, never a panic.
#[derive(Debug, Clone)]
pub struct Config {
    pub cs_url: String,
    pub runtime_url: String,
    pub gpu_lock_ttl: Duration,
    pub gpu_lock_wait: Duration,
    pub retry_countdown: Duration,
    pub max_retries: u32,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub janitor_interval: Duration,
    pub gpu_index: u32,
    pub http_bind: String,
}

impl Config {
    pub fn from_env() -> Self {
        let cs_url = env_or_warn("REDIS_URL", "redis://localhost:6379/0");
        let runtime_url = env_or_warn("OLLAMA_HOST", "http://localhost:11434");

        let gpu_lock_ttl = Duration::from_millis(env_u64("GPU_LOCK_TTL_MS", 10_000));
        let gpu_lock_wait = Duration::from_millis(env_u64("GPU_LOCK_WAIT_MS", 5_000));
        let retry_countdown = Duration::from_secs(env_u64("RETRY_COUNTDOWN_S", 5));
        let max_retries = env_u64("MAX_RETRIES", 20) as u32;
        let soft_timeout = Duration::from_secs(env_u64("SOFT_TIMEOUT_S", 300));
        let hard_timeout = Duration::from_secs(env_u64("HARD_TIMEOUT_S", 360));
        let janitor_interval = Duration::from_secs(env_u64("JANITOR_INTERVAL_S", 300));
        let gpu_index = env_u64("GPU_INDEX", 0) as u32;
        let http_bind = env_or_warn("HTTP_BIND", "0.0.0.0:8000");

        if hard_timeout <= soft_timeout {
            tracing::warn!(
                "HARD_TIMEOUT_S ({}) should exceed SOFT_TIMEOUT_S ({}); timings may look odd",
                hard_timeout.as_secs(),
                soft_timeout.as_secs()
            );
        }

        Config {
            cs_url,
            runtime_url,
            gpu_lock_ttl,
            gpu_lock_wait,
            retry_countdown,
            max_retries,
            soft_timeout,
            hard_timeout,
            janitor_interval,
            gpu_index,
            http_bind,
        }
    }
}

fn env_or_warn(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => {
            tracing::warn!("{key} not set — defaulting to {default}");
            default.to_string()
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v,
        None => {
            tracing::warn!("{key} not set or invalid — defaulting to {default}");
            default
        }
    }
}
