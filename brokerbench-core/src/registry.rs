//! Registry of the consumers a driver has created.
//!
//! Only the owning driver mutates it: `register` on consumer creation and
//! `close_all` on teardown. The lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::consumer::BenchmarkConsumer;
use crate::error::{DriverError, DriverResult};

/// Outcome of a bulk close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct RegistryState {
    consumers: Vec<Arc<dyn BenchmarkConsumer>>,
    closed: bool,
}

/// Consumers in creation order.
#[derive(Default)]
pub struct ConsumerRegistry {
    state: Mutex<RegistryState>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a consumer. Registering the same handle twice is a no-op.
    /// Fails with [`DriverError::Closed`] once `close_all` has started; the
    /// caller still owns the handle then.
    pub fn register(&self, consumer: Arc<dyn BenchmarkConsumer>) -> DriverResult<()> {
        let mut state = self.state();
        if state.closed {
            return Err(DriverError::Closed);
        }
        if !state.consumers.iter().any(|c| Arc::ptr_eq(c, &consumer)) {
            state.consumers.push(consumer);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().consumers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Close every tracked consumer in creation order and refuse further
    /// registrations. A failing consumer is logged and the rest are still
    /// closed.
    pub async fn close_all(&self) -> CloseReport {
        let consumers: Vec<_> = {
            let mut state = self.state();
            state.closed = true;
            state.consumers.drain(..).collect()
        };
        let mut report = CloseReport::default();

        for consumer in consumers {
            match consumer.close().await {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        topic = %consumer.topic(),
                        subscription = %consumer.subscription(),
                        error = %e,
                        "Failed to close consumer"
                    );
                }
            }
        }

        report
    }
}
