use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// Hang threshold used when none is configured.
pub const DEFAULT_HUNG_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: Option<usize>,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,

    /// Jobs queued but not yet finished before submissions get rejected.
    pub max_queue_size: usize,

    /// Default hang threshold for managed tasks. Zero disables hang detection.
    pub hung_threshold: Duration,

    pub panic_strategy: PanicStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "veda-worker".to_string(),
            max_queue_size: 10_000,
            hung_threshold: DEFAULT_HUNG_THRESHOLD,
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.max_queue_size == 0 {
            return Err(Error::config("max_queue_size must be > 0"));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    pub fn hung_threshold(mut self, threshold: Duration) -> Self {
        self.config.hung_threshold = threshold;
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads() >= 1);
        assert_eq!(config.hung_threshold, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        let result = Config::builder().num_threads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_queue() {
        let result = Config::builder().max_queue_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = Config::builder()
            .num_threads(3)
            .thread_name_prefix("io")
            .hung_threshold(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.thread_name_prefix, "io");
        assert_eq!(config.hung_threshold, Duration::from_millis(250));
    }
}
