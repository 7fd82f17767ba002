//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Sizing for [`crate::core::WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of dedicated worker threads.
    pub worker_count: usize,
    /// Capacity of the critical (publishing) queue.
    pub critical_queue_depth: usize,
    /// Capacity of the default queue.
    pub default_queue_depth: usize,
    /// Stack size for each worker thread, in bytes.
    pub thread_stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            critical_queue_depth: 1_000,
            default_queue_depth: 1_000,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl WorkerPoolConfig {
    /// One worker per CPU, 1000-deep queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set both queue capacities.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.critical_queue_depth = depth;
        self.default_queue_depth = depth;
        self
    }

    /// Set the critical queue capacity only.
    #[must_use]
    pub const fn with_critical_queue_depth(mut self, depth: usize) -> Self {
        self.critical_queue_depth = depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Validate sizing values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.critical_queue_depth == 0 {
            return Err("critical_queue_depth must be greater than 0".into());
        }
        if self.default_queue_depth == 0 {
            return Err("default_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}
