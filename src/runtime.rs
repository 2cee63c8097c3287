//! Process-wide runtime management.
//!
//! Most code uses the free functions in [`spawn`](crate::spawn), which run
//! against a lazily created global [`TaskPool`]. Explicit
//! [`init_with_config`] exists for callers that want to size the global
//! pool before first use; isolated pools for tests or embedding are just
//! `TaskPool::new`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::TaskPool;

/// Owns the global task pool and its configuration.
pub struct Runtime {
    pool: TaskPool,
    config: Config,
}

impl Runtime {
    fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = TaskPool::new(config.clone())?;
        Ok(Self { pool, config })
    }

    /// The runtime's worker pool.
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// The configuration the runtime was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

static GLOBAL_RUNTIME: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

/// Initializes the global runtime with default configuration.
pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

/// Initializes the global runtime with `config`; fails if something (an
/// explicit init or a lazy first use) already initialized it.
pub fn init_with_config(config: Config) -> Result<()> {
    let mut runtime = GLOBAL_RUNTIME.write();
    if runtime.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    *runtime = Some(Arc::new(Runtime::new(config)?));
    Ok(())
}

/// The global runtime, created with defaults on first use.
pub fn global() -> Arc<Runtime> {
    if let Some(runtime) = GLOBAL_RUNTIME.read().as_ref() {
        return runtime.clone();
    }
    let mut runtime = GLOBAL_RUNTIME.write();
    runtime
        .get_or_insert_with(|| {
            Arc::new(Runtime::new(Config::default()).expect("failed to start the global task pool"))
        })
        .clone()
}

/// Tears down the global runtime. Workers are joined once the last
/// outstanding handle drops; queued tasks are discarded.
pub fn shutdown() {
    let mut runtime = GLOBAL_RUNTIME.write();
    *runtime = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test covers the whole lifecycle: the global slot is shared
    // state, and parallel test threads would race over it.
    #[test]
    fn test_global_lifecycle() {
        shutdown();

        assert!(init().is_ok());
        assert!(matches!(init(), Err(Error::AlreadyInitialized)));

        let runtime = global();
        assert!(runtime.pool().num_workers() > 0);

        shutdown();
    }
}
