use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Injectable wall clock. Production code uses `SystemClock`; tests pass a
/// `FakeClock` so progress-entry timestamps and reconnect backoff are
/// deterministic.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Shared via `Arc` so a test can
/// hold a handle and the code under test a trait object pointing at the
/// same state.
#[derive(Debug, Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().unwrap() = at;
    }
}

impl Clock for FakeClock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
