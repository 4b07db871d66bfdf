//! Configuration validation

use super::*;
use anyhow::Result;
use tracing::warn;

/// Largest value the preload phase will allocate per entry
const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_workload(config)?;
    validate_stats(config)?;
    validate_driver(config)?;
    validate_store(&config.store)?;
    validate_runtime(&config.runtime)?;

    Ok(())
}

/// Validate workload configuration
pub fn validate_workload(config: &Config) -> Result<()> {
    let workload = &config.workload;

    if workload.operations.is_empty() {
        anyhow::bail!("At least one operation is required");
    }

    for (i, op) in workload.operations.iter().enumerate() {
        if workload.operations[..i].contains(op) {
            anyhow::bail!("Operation '{}' is listed more than once", op);
        }
    }

    let needs_preload = workload.operations.iter().any(|op| op.needs_preload());
    if needs_preload && config.num_entries() == 0 {
        anyhow::bail!("num_entries must be positive when running get or put_if_absent");
    }
    if workload.operations.contains(&OperationKind::IsEmpty) && config.num_entries() == 0 {
        anyhow::bail!("num_entries must be positive when running is_empty (the store must not be empty)");
    }

    let value_size = config.value_size();
    if value_size == 0 {
        anyhow::bail!("value_size must be positive");
    }
    if value_size > MAX_VALUE_SIZE {
        anyhow::bail!("value_size must be at most 64MB, got {}", value_size);
    }

    if config.measure_duration().is_zero() {
        anyhow::bail!("duration must be positive");
    }

    Ok(())
}

/// Validate statistics window settings
pub fn validate_stats(config: &Config) -> Result<()> {
    let stats = &config.stats;

    if stats.num_buckets == 0 || stats.num_buckets > 100_000 {
        anyhow::bail!(
            "num_buckets must be between 1 and 100000, got {}",
            stats.num_buckets
        );
    }

    let window = config.window();
    if window.is_zero() {
        anyhow::bail!("window must be positive");
    }
    if config.window_config().bucket_duration().is_zero() {
        anyhow::bail!(
            "window {:?} is too short for {} buckets",
            window,
            stats.num_buckets
        );
    }

    if let Some(refresh) = stats.refresh_interval {
        if refresh.is_zero() {
            anyhow::bail!("refresh_interval must be positive");
        }
        if refresh > window {
            warn!(
                refresh = ?refresh,
                window = ?window,
                "refresh_interval exceeds the window; slow stats will lag more than one window"
            );
        }
    }

    if stats.queue_capacity == 0 {
        anyhow::bail!("queue_capacity must be positive");
    }

    if config.measure_duration() < window {
        warn!(
            duration = ?config.measure_duration(),
            window = ?window,
            "Measured phase is shorter than the window; the final report will not cover a full window"
        );
    }

    Ok(())
}

/// Validate driver settings
pub fn validate_driver(config: &Config) -> Result<()> {
    let max = config.max_concurrency();
    if max == 0 || max > 65_536 {
        anyhow::bail!("max_concurrency must be between 1 and 65536, got {}", max);
    }

    if config.driver.stats_log_interval.is_zero() {
        anyhow::bail!("stats_log_interval must be positive");
    }

    Ok(())
}

/// Validate simulated store parameters
pub fn validate_store(store: &StoreConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&store.failure_rate) {
        anyhow::bail!(
            "failure_rate must be between 0.0 and 1.0, got {}",
            store.failure_rate
        );
    }

    Ok(())
}

/// Validate runtime settings
pub fn validate_runtime(runtime: &RuntimeConfig) -> Result<()> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    if !LEVELS.contains(&runtime.log_level.to_lowercase().as_str()) {
        anyhow::bail!(
            "log_level must be one of {}, got '{}'",
            LEVELS.join(", "),
            runtime.log_level
        );
    }

    if runtime.worker_threads == Some(0) {
        anyhow::bail!("worker_threads must be positive");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());

        let mut production = Config::default();
        production.runtime.local_test_mode = false;
        assert!(validate_config(&production).is_ok());
    }

    #[test]
    fn test_empty_operations() {
        let mut config = Config::default();
        config.workload.operations.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_operations() {
        let mut config = Config::default();
        config.workload.operations = vec![OperationKind::Set, OperationKind::Set];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_put_if_absent_needs_entries() {
        let mut config = Config::default();
        config.workload.operations = vec![OperationKind::PutIfAbsent];
        config.workload.num_entries = Some(0);
        assert!(validate_config(&config).is_err());

        config.workload.operations = vec![OperationKind::Set];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_buckets() {
        let mut config = Config::default();
        config.stats.num_buckets = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_window_too_short_for_buckets() {
        let mut config = Config::default();
        config.stats.window = Some(Duration::from_nanos(5));
        config.stats.num_buckets = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_queue_capacity() {
        let mut config = Config::default();
        config.stats.queue_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_max_concurrency_bounds() {
        let mut config = Config::default();
        config.driver.max_concurrency = Some(0);
        assert!(validate_config(&config).is_err());

        config.driver.max_concurrency = Some(1);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_failure_rate_range() {
        let mut config = Config::default();
        config.store.failure_rate = 1.5;
        assert!(validate_config(&config).is_err());

        config.store.failure_rate = 1.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut config = Config::default();
        config.runtime.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        config.runtime.log_level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
