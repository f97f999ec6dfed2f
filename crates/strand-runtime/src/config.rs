//! Runtime configuration
//!
//! Compile-time defaults with runtime environment overrides, builder
//! methods for programmatic tuning.
//!
//! Environment variables (all optional):
//! - `STRAND_NUM_WORKERS` - worker threads (0 = hardware parallelism)
//! - `STRAND_PARK_TIMEOUT_MS` - idle worker park bound
//! - `STRAND_BALANCE_INTERVAL_MS` - load-balance cadence per worker
//! - `STRAND_BALANCE_THRESHOLD` - min load gap before migrating
//! - `STRAND_PREEMPT_SLICE_MS` - run length that arms the preemption hint
//! - `STRAND_STEAL_ATTEMPTS` - victim draws per steal round
//! - `STRAND_IO_EXPIRY_SECS` - abandoned I/O wait reaping bound
//! - `STRAND_SWEEP_INTERVAL_MS` - sweeper cadence
//! - `STRAND_POLL_TIMEOUT_MS` - poller wait bound in the I/O driver
//! - `STRAND_MAX_EVENTS` - poller event batch size
//! - `STRAND_CMD_QUEUE_CAPACITY` - poller command queue depth
//! - `STRAND_ARENA_CAPACITY` - per-core arena bytes
//! - `STRAND_DEBUG` - verbose scheduling logs (0/1)

use std::time::Duration;

use strand_core::env::{env_get, env_get_bool};
use strand_core::{StrandError, StrandResult};

/// Compile-time defaults
pub mod defaults {
    pub const NUM_WORKERS: usize = 0;
    pub const PARK_TIMEOUT_MS: u64 = 10;
    pub const BALANCE_INTERVAL_MS: u64 = 50;
    pub const BALANCE_THRESHOLD: u32 = 2;
    pub const PREEMPT_SLICE_MS: u64 = 10;
    pub const STEAL_ATTEMPTS: usize = 4;
    pub const IO_EXPIRY_SECS: u64 = 30;
    pub const SWEEP_INTERVAL_MS: u64 = 100;
    pub const POLL_TIMEOUT_MS: u64 = 100;
    pub const MAX_EVENTS: usize = 256;
    pub const CMD_QUEUE_CAPACITY: usize = 4096;
    pub const ARENA_CAPACITY: usize = 64 * 1024;
    pub const DEBUG_LOGGING: bool = false;
}

/// Scheduler configuration with builder methods.
///
/// Use `from_env()` to start from the compile-time defaults with any
/// environment overrides applied.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker threads; 0 selects hardware parallelism
    pub num_workers: usize,
    /// Bounded park for idle workers
    pub park_timeout: Duration,
    /// Per-worker load balancing cadence
    pub balance_interval: Duration,
    /// Load gap required before migrating one task
    pub balance_threshold: u32,
    /// Continuous run length that arms the preemption hint
    pub preempt_slice: Duration,
    /// Random victim draws per steal round
    pub steal_attempts: usize,
    /// I/O waits older than this are reaped by the sweeper
    pub io_expiry: Duration,
    /// Sweeper thread cadence
    pub sweep_interval: Duration,
    /// Poller wait bound in the I/O driver loop
    pub poll_timeout: Duration,
    /// Poller event batch size
    pub max_events: usize,
    /// Poller command queue depth (io_uring backend)
    pub cmd_queue_capacity: usize,
    /// Per-core arena size in bytes
    pub arena_capacity: usize,
    /// Verbose scheduling logs
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Compile-time defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("STRAND_NUM_WORKERS", defaults::NUM_WORKERS),
            park_timeout: Duration::from_millis(env_get(
                "STRAND_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            balance_interval: Duration::from_millis(env_get(
                "STRAND_BALANCE_INTERVAL_MS",
                defaults::BALANCE_INTERVAL_MS,
            )),
            balance_threshold: env_get("STRAND_BALANCE_THRESHOLD", defaults::BALANCE_THRESHOLD),
            preempt_slice: Duration::from_millis(env_get(
                "STRAND_PREEMPT_SLICE_MS",
                defaults::PREEMPT_SLICE_MS,
            )),
            steal_attempts: env_get("STRAND_STEAL_ATTEMPTS", defaults::STEAL_ATTEMPTS),
            io_expiry: Duration::from_secs(env_get(
                "STRAND_IO_EXPIRY_SECS",
                defaults::IO_EXPIRY_SECS,
            )),
            sweep_interval: Duration::from_millis(env_get(
                "STRAND_SWEEP_INTERVAL_MS",
                defaults::SWEEP_INTERVAL_MS,
            )),
            poll_timeout: Duration::from_millis(env_get(
                "STRAND_POLL_TIMEOUT_MS",
                defaults::POLL_TIMEOUT_MS,
            )),
            max_events: env_get("STRAND_MAX_EVENTS", defaults::MAX_EVENTS),
            cmd_queue_capacity: env_get(
                "STRAND_CMD_QUEUE_CAPACITY",
                defaults::CMD_QUEUE_CAPACITY,
            ),
            arena_capacity: env_get("STRAND_ARENA_CAPACITY", defaults::ARENA_CAPACITY),
            debug_logging: env_get_bool("STRAND_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Worker count; 0 selects hardware parallelism at start
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn balance_interval(mut self, d: Duration) -> Self {
        self.balance_interval = d;
        self
    }

    pub fn preempt_slice(mut self, d: Duration) -> Self {
        self.preempt_slice = d;
        self
    }

    pub fn io_expiry(mut self, d: Duration) -> Self {
        self.io_expiry = d;
        self
    }

    pub fn sweep_interval(mut self, d: Duration) -> Self {
        self.sweep_interval = d;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn debug_logging(mut self, on: bool) -> Self {
        self.debug_logging = on;
        self
    }

    /// Resolve the worker count (0 means hardware parallelism)
    pub fn effective_workers(&self) -> usize {
        if self.num_workers != 0 {
            return self.num_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> StrandResult<()> {
        if self.max_events == 0 {
            return Err(StrandError::InvalidConfig("max_events must be > 0"));
        }
        if self.cmd_queue_capacity == 0 {
            return Err(StrandError::InvalidConfig("cmd_queue_capacity must be > 0"));
        }
        if self.steal_attempts == 0 {
            return Err(StrandError::InvalidConfig("steal_attempts must be > 0"));
        }
        if self.arena_capacity == 0 {
            return Err(StrandError::InvalidConfig("arena_capacity must be > 0"));
        }
        if self.balance_threshold == 0 {
            return Err(StrandError::InvalidConfig("balance_threshold must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = RuntimeConfig::from_env();
        assert!(cfg.validate().is_ok());
        assert!(cfg.effective_workers() >= 1);
    }

    #[test]
    fn test_builder_overrides() {
        let cfg = RuntimeConfig::from_env()
            .num_workers(3)
            .park_timeout(Duration::from_millis(1))
            .debug_logging(true);
        assert_eq!(cfg.num_workers, 3);
        assert_eq!(cfg.effective_workers(), 3);
        assert_eq!(cfg.park_timeout, Duration::from_millis(1));
        assert!(cfg.debug_logging);
    }

    #[test]
    fn test_validate_rejects_zero_events() {
        let mut cfg = RuntimeConfig::from_env();
        cfg.max_events = 0;
        assert!(matches!(cfg.validate(), Err(StrandError::InvalidConfig(_))));
    }
}
