use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_REPORT_EVERY: u32 = 10;

/// Who currently holds the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub caller: String,
    pub operation: &'static str,
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.caller, self.operation)
    }
}

fn current_caller() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

/// Exclusive access to one shared resource.
///
/// Waiters poll rather than park so that every `report_every`-th poll can
/// report who holds the resource. There is no fairness: whichever waiter
/// polls first after a release wins.
#[derive(Debug)]
pub struct AccessSerializer<T> {
    resource: Mutex<T>,
    holder: Mutex<Option<Holder>>,
    poll_interval: Duration,
    report_every: u32,
}

impl<T> AccessSerializer<T> {
    pub fn new(resource: T) -> Self {
        Self::with_polling(resource, DEFAULT_POLL_INTERVAL, DEFAULT_REPORT_EVERY)
    }

    pub fn with_polling(resource: T, poll_interval: Duration, report_every: u32) -> Self {
        Self {
            resource: Mutex::new(resource),
            holder: Mutex::new(None),
            poll_interval,
            report_every: report_every.max(1),
        }
    }

    /// Blocks until the resource is free, then holds it until the guard drops
    pub fn acquire(&self, operation: &'static str) -> AccessGuard<'_, T> {
        let mut waits: u32 = 0;
        loop {
            if let Some(guard) = self.poll(operation, &mut waits) {
                return guard;
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up at `deadline`
    pub fn acquire_until(
        &self,
        operation: &'static str,
        deadline: Instant,
    ) -> Option<AccessGuard<'_, T>> {
        let mut waits: u32 = 0;
        loop {
            if let Some(guard) = self.try_acquire(operation) {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            self.report_wait(operation, &mut waits);
            let left = deadline.saturating_duration_since(Instant::now());
            thread::sleep(self.poll_interval.min(left));
        }
    }

    fn poll(&self, operation: &'static str, waits: &mut u32) -> Option<AccessGuard<'_, T>> {
        let guard = self.try_acquire(operation);
        if guard.is_none() {
            self.report_wait(operation, waits);
            thread::sleep(self.poll_interval);
        }
        guard
    }

    fn report_wait(&self, operation: &'static str, waits: &mut u32) {
        *waits = waits.wrapping_add(1);
        if *waits % self.report_every == 0 {
            match self.holder() {
                Some(holder) => debug!(
                    operation,
                    waits = *waits,
                    holder = %holder,
                    "Waiting for bus access"
                ),
                None => debug!(operation, waits = *waits, "Waiting for bus access"),
            }
        }
    }

    pub fn try_acquire(&self, operation: &'static str) -> Option<AccessGuard<'_, T>> {
        let guard = match self.resource.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!(operation, "Previous bus holder panicked, recovering access");
                self.resource.clear_poison();
                poisoned.into_inner()
            }
        };

        *self.lock_holder() = Some(Holder {
            caller: current_caller(),
            operation,
        });

        Some(AccessGuard {
            guard,
            holder: &self.holder,
        })
    }

    pub fn holder(&self) -> Option<Holder> {
        self.lock_holder().clone()
    }

    pub fn into_inner(self) -> T {
        self.resource
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_holder(&self) -> MutexGuard<'_, Option<Holder>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped access; releases the resource on every exit path
pub struct AccessGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a Mutex<Option<Holder>>,
}

impl<T> Deref for AccessGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for AccessGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for AccessGuard<'_, T> {
    fn drop(&mut self) {
        // Cleared before the mutex guard field drops, so a new holder never
        // gets overwritten.
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
