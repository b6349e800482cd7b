//! Run-wide rate limiting: global concurrency plus per-model pacing.
//!
//! Two independent constraints gate every remote call:
//!
//! 1. a global in-flight bound enforced by a FIFO semaphore
//!    (`max_concurrent`, 0 = unlimited), and
//! 2. a per-model rolling 60-second window of call starts
//!    (`rate_limit_rpm`, 0 = unpaced).
//!
//! Acquisition blocks until both hold or the run is cancelled. Pacing
//! slots are not released explicitly; they age out of the window. Waiters
//! queue in arrival order: the semaphore is FIFO, and pacing waiters
//! serialize on a per-model async mutex held through the backoff sleep.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CategorizedError, ErrorCategory};

/// Length of the per-model pacing window.
const WINDOW: Duration = Duration::from_secs(60);

type ModelWindow = Arc<tokio::sync::Mutex<VecDeque<Instant>>>;

/// Token held while a job is in flight.
///
/// Dropping it releases the global concurrency slot. The pacing slot is
/// deliberately not released; it expires with the window.
#[derive(Debug)]
pub struct InFlightPermit {
    _global: Option<OwnedSemaphorePermit>,
}

/// Enforces the run's concurrency and pacing caps.
#[derive(Debug)]
pub struct RateLimiter {
    global: Option<Arc<Semaphore>>,
    rpm: u32,
    windows: Mutex<HashMap<String, ModelWindow>>,
}

impl RateLimiter {
    /// Create a limiter with the given caps; 0 disables a constraint.
    pub fn new(max_concurrent: usize, rate_limit_rpm: u32) -> Self {
        Self {
            global: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
            rpm: rate_limit_rpm,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Block until both constraints admit a call for `model`, or the run
    /// is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCategory::Cancelled`] when `cancel` fires while
    /// waiting.
    pub async fn acquire(
        &self,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<InFlightPermit, CategorizedError> {
        let global = match &self.global {
            Some(semaphore) => Some(self.acquire_global(semaphore, cancel).await?),
            None => None,
        };

        if self.rpm > 0 {
            self.acquire_pacing_slot(model, cancel).await?;
        }

        Ok(InFlightPermit { _global: global })
    }

    async fn acquire_global(
        &self,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, CategorizedError> {
        tokio::select! {
            () = cancel.cancelled() => Err(cancelled_error("concurrency slot")),
            permit = Arc::clone(semaphore).acquire_owned() => permit.map_err(|_| {
                CategorizedError::new(ErrorCategory::Unknown, "limiter semaphore closed")
            }),
        }
    }

    async fn acquire_pacing_slot(
        &self,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CategorizedError> {
        let window = self.window_for(model)?;

        // Holding the model lock through the sleep keeps waiters in
        // arrival order.
        let mut slots = tokio::select! {
            () = cancel.cancelled() => return Err(cancelled_error("pacing slot")),
            guard = window.lock() => guard,
        };

        loop {
            let now = Instant::now();
            while slots
                .front()
                .is_some_and(|&start| now.saturating_duration_since(start) >= WINDOW)
            {
                slots.pop_front();
            }

            let capacity = usize::try_from(self.rpm).unwrap_or(usize::MAX);
            if slots.len() < capacity {
                slots.push_back(now);
                return Ok(());
            }

            let oldest = slots.front().copied().unwrap_or(now);
            let ready_at = oldest.checked_add(WINDOW).unwrap_or(now);
            tokio::select! {
                () = cancel.cancelled() => return Err(cancelled_error("pacing slot")),
                () = tokio::time::sleep_until(ready_at) => {}
            }
        }
    }

    fn window_for(&self, model: &str) -> Result<ModelWindow, CategorizedError> {
        let mut windows = self.windows.lock().map_err(|_| {
            CategorizedError::new(ErrorCategory::Unknown, "limiter window map poisoned")
        })?;
        Ok(Arc::clone(
            windows.entry(model.to_owned()).or_default(),
        ))
    }
}

fn cancelled_error(what: &str) -> CategorizedError {
    CategorizedError::cancelled(format!("cancelled while waiting for a {what}"))
}
