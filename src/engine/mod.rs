mod conflict;
mod error;
mod expiry;
mod mutations;
mod queries;
mod status;

pub use conflict::{conflicts, find_conflict};
pub use error::EngineError;
pub use expiry::{days_left, expiring_window_end};
pub use status::{classify, last_booked_day_in_row, split_at};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::clock::Clock;
use crate::config::AccessPolicy;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::Repositories;

/// Result of a take request. Only `Taken` changes the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeOutcome {
    Taken { resource: Resource, booking: Booking },
    /// The request collides with `conflicting`; nothing was booked.
    Conflict { resource: Resource, conflicting: Booking },
    UnknownResource,
    UnknownVisitor,
}

impl TakeOutcome {
    pub fn booking(&self) -> Option<&Booking> {
        match self {
            TakeOutcome::Taken { booking, .. } => Some(booking),
            _ => None,
        }
    }

    pub fn conflicting(&self) -> Option<&Booking> {
        match self {
            TakeOutcome::Conflict { conflicting, .. } => Some(conflicting),
            _ => None,
        }
    }
}

/// A booking ended early by its owner or an admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Returned {
    /// The live booking as it was before the return.
    pub booking: Booking,
    pub closed: ClosedBooking,
    pub resource: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetails {
    pub booking: Booking,
    pub visitor: Option<Visitor>,
    pub resource: Option<Resource>,
}

/// Booking core. All booking mutations on a resource run under that
/// resource's mutex; reads take no locks.
pub struct Engine {
    pub(super) repos: Repositories,
    pub(super) clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: AccessPolicy,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>, notify: Arc<NotifyHub>, policy: AccessPolicy) -> Self {
        Self {
            repos,
            clock,
            notify,
            policy,
            locks: DashMap::new(),
        }
    }

    pub fn now(&self) -> Ts {
        self.clock.now()
    }

    /// Exclusive access to one resource's bookings until the guard drops.
    pub(super) async fn lock_resource(&self, resource_name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(resource_name.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the per-resource locks nobody holds or waits on.
    pub fn prune_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
