pub mod script_adapter;

use std::path::Path;
use std::time::Duration;

use mdm_core::broker::{BackoffPolicy, BrokerConfig};
use mdm_core::config::MdmConfig;
use mdm_core::orchestrator::{AdapterFactory, Orchestrator};

/// Config pointed at a scratch dir, tuned so tests run in seconds.
pub fn test_config(root: &Path) -> MdmConfig {
    let mut cfg = MdmConfig::default();
    cfg.max_concurrent_jobs = 3;
    cfg.progress_throttle_ms = 50;
    cfg.job_timeout_ms = 60_000;
    cfg.watchdog_stall_ms = 30_000;
    cfg.grace_timeout_ms = 2_000;
    cfg.data_dir = root.join("data");
    cfg.temp_dir = root.join("tmp");
    cfg
}

/// Broker tuned for fast retries while keeping the real policy shape.
pub fn fast_broker(capacity: usize) -> BrokerConfig {
    BrokerConfig {
        capacity,
        backoff: BackoffPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(200),
            factor: 2,
            jitter: 0.2,
            max_delay: Duration::from_secs(5),
        },
        staleness: Duration::from_secs(30),
    }
}

pub async fn open_orchestrator(root: &Path, factory: AdapterFactory) -> Orchestrator {
    let cfg = test_config(root);
    let broker_cfg = fast_broker(cfg.max_concurrent_jobs);
    Orchestrator::open_custom(cfg, &root.join("jobs.db"), factory, broker_cfg)
        .await
        .expect("open orchestrator")
}
