use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::StorageError;

/// Global gate bounding how many requests may hold a file handle at once.
///
/// The capacity can change at runtime. Shrinking below the number of tickets
/// already issued records a debt that is paid back as those tickets return,
/// so outstanding tickets stay valid.
pub(crate) struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    /// Configured capacity; 0 means unlimited.
    capacity: usize,
    /// Permits still to be withheld after a shrink.
    debt: usize,
}

/// Held for the duration of one read or write.
pub(crate) struct Ticket {
    permit: Option<OwnedSemaphorePermit>,
    limiter: Arc<AdmissionLimiter>,
}

fn permits_for(capacity: usize) -> usize {
    match capacity {
        0 => Semaphore::MAX_PERMITS,
        n => n.min(Semaphore::MAX_PERMITS),
    }
}

impl AdmissionLimiter {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(permits_for(capacity))),
            state: Mutex::new(LimiterState { capacity, debt: 0 }),
        })
    }

    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<Ticket, StorageError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Io(std::io::Error::other("admission limiter closed")))?;
        Ok(Ticket {
            permit: Some(permit),
            limiter: Arc::clone(self),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub(crate) fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        let old = permits_for(state.capacity);
        let new = permits_for(capacity);

        if new > old {
            let mut grow = new - old;
            let repaid = grow.min(state.debt);
            state.debt -= repaid;
            grow -= repaid;
            self.semaphore.add_permits(grow);
        } else if new < old {
            let shrink = old - new;
            let forgotten = self.semaphore.forget_permits(shrink);
            state.debt += shrink - forgotten;
        }

        state.capacity = capacity;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let mut state = self.limiter.state.lock();
        if state.debt > 0 {
            state.debt -= 1;
            permit.forget();
        }
    }
}
