//! Convenient re-exports for common types and functions.
//!
//! This module provides a single import for most use cases:
//! ```
//! use strand::prelude::*;
//! ```

pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::executor::{Executor, ExecutorRef, PoolHandle, Task, TaskGroup, TaskPool};
pub use crate::serial::{NSerializer, RwSerializer, Serializer};

// Re-export the free-function spawn API
#[doc(inline)]
pub use crate::spawn::{spawn, spawn_and_wait, spawn_and_wait_all, submit, wait};

#[doc(inline)]
pub use crate::{init, init_with_config, shutdown};
