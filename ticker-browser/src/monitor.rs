//! Background pool monitors.
//!
//! Two loops share the pool's cancellation token: one samples host memory,
//! the other probes the active session. Either one rotates the pool when its
//! threshold is breached.

use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::BrowserPool;

// ============================================================================
// Memory
// ============================================================================

/// Source of host memory usage.
pub trait MemorySampler: Send + 'static {
    /// Used memory as a percentage of total, `None` when it cannot be determined.
    fn used_percent(&mut self) -> Option<f64>;
}

/// Samples physical memory through `sysinfo`.
pub struct SystemMemory {
    system: System,
}

impl SystemMemory {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemMemory {
    fn used_percent(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

/// Rotate the pool whenever host memory usage exceeds the configured threshold.
pub fn spawn_memory_monitor<S: MemorySampler>(pool: BrowserPool, mut sampler: S) -> JoinHandle<()> {
    let token = pool.cancellation_token();
    let interval = pool.config().monitor_interval();
    let threshold = pool.config().memory_threshold_pct;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Memory monitor stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some(used) = sampler.used_percent() else {
                continue;
            };

            if used > threshold {
                warn!(used_pct = used, threshold, "High memory usage, rotating browser");
                if let Err(e) = pool.rotate().await {
                    warn!(error = %e, "Memory-triggered rotation failed");
                }
            }
        }
    })
}

// ============================================================================
// Health
// ============================================================================

/// Consecutive-failure tracker for the active session.
#[derive(Debug, Clone, Default)]
pub struct SessionHealth {
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub last_error: Option<String>,
}

impl SessionHealth {
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_error = None;
        self.total_checks += 1;
        self.successful_checks += 1;
    }

    /// Record a failed probe. Returns true once `threshold` consecutive failures accumulate.
    pub fn record_failure(&mut self, error: &str, threshold: u32) -> bool {
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
        self.total_checks += 1;
        self.consecutive_failures >= threshold
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// Probe the active session on an interval; rotate after repeated failures.
pub fn spawn_health_monitor(pool: BrowserPool) -> JoinHandle<()> {
    let token = pool.cancellation_token();
    let interval = pool.config().monitor_interval();
    let probe_timeout = pool.config().probe_timeout();
    let threshold = pool.config().health_failure_threshold;

    tokio::spawn(async move {
        let mut health = SessionHealth::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Health monitor stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some((id, session)) = pool.active_session() else {
                continue;
            };

            let outcome = match tokio::time::timeout(probe_timeout, session.probe()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no response within {probe_timeout:?}")),
            };

            match outcome {
                Ok(()) => health.record_success(),
                Err(reason) => {
                    warn!(session = id, failures = health.consecutive_failures + 1, %reason, "Browser health probe failed");
                    if health.record_failure(&reason, threshold) {
                        info!(session = id, "Browser unresponsive, rotating");
                        if let Err(e) = pool.rotate().await {
                            warn!(error = %e, "Health-triggered rotation failed");
                        }
                        health.reset();
                    }
                }
            }
        }
    })
}

/// Start both monitors on the pool with the host memory sampler.
pub fn start_monitors(pool: &BrowserPool) {
    pool.register_monitor(spawn_memory_monitor(pool.clone(), SystemMemory::new()));
    pool.register_monitor(spawn_health_monitor(pool.clone()));
}
