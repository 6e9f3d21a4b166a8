use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// 调度器运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub max_workers: usize,
    pub signal_capacity: usize,
    pub outbound_capacity: usize,
    pub relink_interval: Duration,
    pub start_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::ZERO,
            max_workers: 4,
            signal_capacity: 16,
            outbound_capacity: 250,
            relink_interval: Duration::from_secs(60),
            start_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub ops_addr: String,
    pub local_root: PathBuf,
    pub gateways_file: Option<PathBuf>,
    pub scheduler: SchedulerSettings,
    pub scheduler_enabled: bool,
    pub stop_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        // Load .env early so process env reads pick it up.
        let _ = dotenvy::dotenv();

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let ops_addr = env::var("OPS_ADDR").unwrap_or_else(|_| "0.0.0.0:9100".to_string());
        let local_root = env::var("EDI_LOCAL_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/edi"));
        let gateways_file = env::var("EDI_GATEWAYS_FILE").ok().map(PathBuf::from);

        let defaults = SchedulerSettings::default();
        let interval_secs = env_u64("SYNC_INTERVAL_SECS", defaults.interval.as_secs());
        if interval_secs == 0 {
            return Err(anyhow!("SYNC_INTERVAL_SECS must be greater than 0"));
        }
        let max_workers = env_u64("SYNC_MAX_WORKERS", defaults.max_workers as u64);
        if max_workers == 0 {
            return Err(anyhow!("SYNC_MAX_WORKERS must be greater than 0"));
        }
        let signal_capacity = env_u64("SIGNAL_QUEUE_CAPACITY", defaults.signal_capacity as u64);
        if signal_capacity == 0 {
            return Err(anyhow!("SIGNAL_QUEUE_CAPACITY must be greater than 0"));
        }

        let scheduler = SchedulerSettings {
            interval: Duration::from_secs(interval_secs),
            initial_delay: Duration::from_secs(env_u64("SYNC_INITIAL_DELAY_SECS", 0)),
            max_workers: max_workers as usize,
            signal_capacity: signal_capacity as usize,
            outbound_capacity: env_u64(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_capacity as u64,
            )
            .max(1) as usize,
            relink_interval: Duration::from_secs(env_u64(
                "RELINK_INTERVAL_SECS",
                defaults.relink_interval.as_secs(),
            )),
            start_timeout: Duration::from_secs(
                env_u64("START_TIMEOUT_SECS", defaults.start_timeout.as_secs()).max(1),
            ),
        };
        let scheduler_enabled = env_bool("SYNC_ENABLED", true);
        let stop_timeout = Duration::from_secs(env_u64("STOP_TIMEOUT_SECS", 5));

        Ok(Self {
            database_url,
            ops_addr,
            local_root,
            gateways_file,
            scheduler,
            scheduler_enabled,
            stop_timeout,
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(30));
        assert_eq!(settings.outbound_capacity, 250);
        assert!(settings.max_workers > 0);
        assert!(settings.signal_capacity > 0);
    }

    #[test]
    fn test_env_helpers_fall_back_to_defaults() {
        assert_eq!(env_u64("EDI_TEST_UNSET_U64_KEY", 7), 7);
        assert!(env_bool("EDI_TEST_UNSET_BOOL_KEY", true));
        assert!(!env_bool("EDI_TEST_UNSET_BOOL_KEY", false));
    }
}
