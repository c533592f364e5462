//! Device status and memory monitoring
//!
//! Memory figures come from an injected [`MemorySource`] so the agent can
//! run on hosts where the numbers mean different things (or nothing). The
//! monitor itself tracks the minimum observed free value across samples.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A point-in-time memory sample
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    /// Currently free bytes
    pub free_bytes: u64,
    /// Minimum free bytes observed since start
    pub min_free_bytes: u64,
    /// Largest allocatable contiguous block
    pub largest_block_bytes: u64,
    /// Secondary RAM total, when the platform has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psram_total_bytes: Option<u64>,
    /// Secondary RAM free, when the platform has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psram_free_bytes: Option<u64>,
}

/// Source of memory samples, injected at construction
pub trait MemorySource: Send + Sync {
    /// Take a sample. `min_free_bytes` may equal `free_bytes`; the monitor
    /// overrides it with the observed minimum.
    fn sample(&self) -> MemoryInfo;
}

/// Memory source reporting fixed figures, for hosts and tests
#[derive(Debug, Clone)]
pub struct FixedMemory {
    info: MemoryInfo,
}

impl FixedMemory {
    /// Create a fixed source with the given free and largest-block figures
    pub fn new(free_bytes: u64, largest_block_bytes: u64) -> Self {
        Self {
            info: MemoryInfo {
                free_bytes,
                min_free_bytes: free_bytes,
                largest_block_bytes,
                psram_total_bytes: None,
                psram_free_bytes: None,
            },
        }
    }

    /// Add secondary RAM figures
    pub fn with_psram(mut self, total: u64, free: u64) -> Self {
        self.info.psram_total_bytes = Some(total);
        self.info.psram_free_bytes = Some(free);
        self
    }
}

impl Default for FixedMemory {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024, 1024 * 1024)
    }
}

impl MemorySource for FixedMemory {
    fn sample(&self) -> MemoryInfo {
        self.info.clone()
    }
}

/// Process-wide status: identity, uptime, memory
pub struct SystemMonitor {
    started: Instant,
    device_id: String,
    memory: Box<dyn MemorySource>,
    min_free: AtomicU64,
}

impl SystemMonitor {
    /// Create a monitor sampling from the given source
    pub fn new(memory: Box<dyn MemorySource>) -> Self {
        Self {
            started: Instant::now(),
            device_id: format!("ec-{:08x}", std::process::id()),
            memory,
            min_free: AtomicU64::new(u64::MAX),
        }
    }

    /// Stable identifier for this process incarnation
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Time since the monitor was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whole seconds since the monitor was created
    pub fn uptime_secs(&self) -> u64 {
        self.uptime().as_secs()
    }

    /// Sample memory and fold in the observed minimum
    pub fn memory(&self) -> MemoryInfo {
        let mut info = self.memory.sample();
        let min = self
            .min_free
            .fetch_min(info.free_bytes, Ordering::Relaxed)
            .min(info.free_bytes);
        info.min_free_bytes = min;
        info
    }
}
