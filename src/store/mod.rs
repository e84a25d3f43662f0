//! Capability interfaces the engine consumes, one per entity type.
//!
//! Every list comes back materialised and ordered; nothing is loaded lazily.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    /// A unique key (resource name, category name, external id) is taken.
    Duplicate(String),
    /// The journal could not be written.
    Journal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Duplicate(key) => write!(f, "duplicate key: {key}"),
            StoreError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn get(&self, name: &str) -> StoreResult<Option<Category>>;
    async fn add(&self, category: Category) -> StoreResult<()>;
    /// In creation order.
    async fn list(&self) -> StoreResult<Vec<Category>>;
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn get(&self, name: &str) -> StoreResult<Option<Resource>>;
    async fn get_by_id(&self, id: ResourceId) -> StoreResult<Option<Resource>>;
    /// Assigns the next id. Fails with `Duplicate` when the name is taken.
    async fn add(&self, resource: NewResource, at: Ts) -> StoreResult<Resource>;
    /// Ascending id.
    async fn list(&self) -> StoreResult<Vec<Resource>>;
    /// Ascending id.
    async fn list_in_category(&self, category: &str) -> StoreResult<Vec<Resource>>;
}

#[async_trait]
pub trait VisitorRepository: Send + Sync {
    async fn get(&self, email: &str) -> StoreResult<Option<Visitor>>;
    async fn get_by_external_id(&self, external_id: i64) -> StoreResult<Option<Visitor>>;
    /// Insert or replace by email. Fails with `Duplicate` when the external id
    /// belongs to another visitor.
    async fn save(&self, visitor: Visitor) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<Visitor>>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get(&self, id: BookingId) -> StoreResult<Option<Booking>>;
    /// Assigns the next id.
    async fn add(&self, booking: NewBooking) -> StoreResult<Booking>;
    /// Every booking, ascending id.
    async fn list(&self) -> StoreResult<Vec<Booking>>;
    /// Bookings of one resource, ascending id.
    async fn list_for_resource(&self, resource_name: &str) -> StoreResult<Vec<Booking>>;
    /// Bookings of one resource with `take_date > after`, ascending take date.
    async fn list_future_for_resource(&self, resource_name: &str, after: Ts) -> StoreResult<Vec<Booking>>;
    /// Bookings of one visitor with `take_date > after`, ascending take date.
    async fn list_future_for_visitor(&self, email: &str, after: Ts) -> StoreResult<Vec<Booking>>;
    /// Bookings with `from < return_date <= to`, ascending id. `from = None` means unbounded.
    async fn list_returning_between(&self, from: Option<Ts>, to: Ts) -> StoreResult<Vec<Booking>>;
    /// Remove the live booking and record its closed copy in one journal entry.
    /// `None` when the booking is gone.
    async fn close(&self, id: BookingId, at: Ts) -> StoreResult<Option<ClosedBooking>>;
    /// `None` when the booking is already gone.
    async fn delete(&self, id: BookingId) -> StoreResult<Option<Booking>>;
}

#[async_trait]
pub trait ClosedBookingRepository: Send + Sync {
    async fn get(&self, id: BookingId) -> StoreResult<Option<ClosedBooking>>;
    /// Ascending id.
    async fn list_for_visitor(&self, email: &str) -> StoreResult<Vec<ClosedBooking>>;
    /// Ascending id.
    async fn list_for_resource(&self, resource_name: &str) -> StoreResult<Vec<ClosedBooking>>;
}

/// The set of repositories handed to the engine.
#[derive(Clone)]
pub struct Repositories {
    pub categories: Arc<dyn CategoryRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub visitors: Arc<dyn VisitorRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub closed: Arc<dyn ClosedBookingRepository>,
}

impl Repositories {
    /// All five repositories served by one memory store.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            categories: store.clone(),
            resources: store.clone(),
            visitors: store.clone(),
            bookings: store.clone(),
            closed: store,
        }
    }
}
