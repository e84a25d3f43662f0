use std::sync::Mutex;

use chrono::Utc;

use crate::model::Ts;

/// Source of "now" for every engine operation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Ts;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ts {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Ts>,
}

impl ManualClock {
    pub fn new(now: Ts) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: Ts) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ts {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
