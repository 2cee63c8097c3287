use crate::error::{Error, Result};

/// Configuration for a [`TaskPool`](crate::executor::TaskPool).
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed worker count; `None` means one per hardware thread.
    pub num_threads: Option<usize>,
    /// Preallocated fast-path slots per worker deque. Raised automatically
    /// when it would fall below twice the worker-slot count.
    pub deque_capacity: usize,
    /// Stack size for worker threads.
    pub stack_size: Option<usize>,
    /// Worker threads are named `<prefix>-<index>`.
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            deque_capacity: 256,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "strand-worker".to_string(),
        }
    }
}

impl Config {
    /// Starts a builder over the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Checks the configuration for values the pool cannot honor.
    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.deque_capacity > 1 << 15 {
            return Err(Error::config("deque_capacity too large (max 32768)"));
        }

        Ok(())
    }

    /// The effective worker count.
    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Builder over default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Sets the fixed worker count.
    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    /// Sets the per-worker fast-path deque capacity.
    pub fn deque_capacity(mut self, capacity: usize) -> Self {
        self.config.deque_capacity = capacity;
        self
    }

    /// Sets the worker thread stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Sets the worker thread name prefix.
    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Validates and produces the configuration.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threads_rejected() {
        let result = Config::builder().num_threads(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_round_trip() {
        let config = Config::builder()
            .num_threads(2)
            .deque_capacity(64)
            .thread_name_prefix("t")
            .build()
            .unwrap();
        assert_eq!(config.worker_threads(), 2);
        assert_eq!(config.deque_capacity, 64);
    }
}
