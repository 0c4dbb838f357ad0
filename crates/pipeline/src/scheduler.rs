//! Invoke admission control
//!
//! This module bounds how many invocations may be waiting for or running
//! on the pipeline. Requests beyond the bound are rejected immediately
//! (backpressure); requests that cannot get the model within the queue
//! timeout give up. Generation itself runs on the blocking thread pool.

use crate::pipeline::TextGenerator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use textgen_common::error::{Result, TextgenError};
use textgen_common::METRICS;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Invocations allowed to run at once; a model holds a single KV cache
const EXECUTION_SLOTS: usize = 1;

/// Scheduler limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum invocations waiting or running
    pub max_pending: usize,

    /// How long an invocation may wait for the model
    pub queue_timeout: Duration,
}

/// Admission control in front of a [`TextGenerator`]
#[derive(Clone)]
pub struct InvokeScheduler {
    /// Configuration
    config: SchedulerConfig,

    /// The wrapped generator
    generator: Arc<dyn TextGenerator>,

    /// Invocations waiting or running
    pending: Arc<AtomicUsize>,

    /// Execution slots
    slots: Arc<Semaphore>,
}

/// Releases a pending slot when the invocation ends, however it ends
struct PendingGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let depth = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        METRICS.invoke.pending_requests.set(depth as i64);
    }
}

impl InvokeScheduler {
    /// Create a new scheduler
    pub fn new(generator: Arc<dyn TextGenerator>, config: SchedulerConfig) -> Self {
        Self {
            config,
            generator,
            pending: Arc::new(AtomicUsize::new(0)),
            slots: Arc::new(Semaphore::new(EXECUTION_SLOTS)),
        }
    }

    /// Run one invocation
    ///
    /// Returns `QueueFull` when `max_pending` invocations are already in
    /// flight and `Timeout` when the model stays busy past the queue
    /// timeout.
    pub async fn invoke(&self, query: String) -> Result<String> {
        let guard = self.admit()?;

        let permit = timeout(self.config.queue_timeout, self.slots.clone().acquire_owned())
            .await
            .map_err(|_| {
                METRICS.invoke.requests_rejected.inc();
                TextgenError::timeout(format!(
                    "Pipeline busy for longer than {:?}",
                    self.config.queue_timeout
                ))
            })?
            .map_err(|_| TextgenError::internal("Scheduler closed"))?;

        let generator = self.generator.clone();
        // The generation outlives a caller that stops waiting, so it owns
        // its pending slot and execution slot until it finishes.
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let _permit = permit;
            METRICS.invoke.active_requests.inc();
            let result = generator.invoke(&query);
            METRICS.invoke.active_requests.dec();
            result
        })
        .await
        .map_err(|e| TextgenError::internal(format!("Generation task failed: {}", e)))?
    }

    /// Reserve a pending slot or reject the request
    fn admit(&self) -> Result<PendingGuard> {
        let previous = self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard {
            pending: self.pending.clone(),
        };

        if previous >= self.config.max_pending {
            METRICS.invoke.requests_rejected.inc();
            warn!("Rejecting invocation, {} already pending", previous);
            return Err(TextgenError::queue_full(format!(
                "{} invocations already pending",
                previous
            )));
        }

        METRICS.invoke.pending_requests.set((previous + 1) as i64);
        trace!("Invocation admitted, pending: {}", previous + 1);
        Ok(guard)
    }

    /// Get the current number of pending invocations
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Check if the scheduler still has headroom (below 90% of the bound)
    pub fn is_healthy(&self) -> bool {
        let depth = self.pending();
        let healthy = depth < (self.config.max_pending * 9).div_ceil(10);
        if !healthy {
            debug!("Scheduler saturated: {} pending", depth);
        }
        healthy
    }
}
