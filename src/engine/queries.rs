use std::collections::HashMap;

use crate::limits::*;
use crate::model::*;

use super::expiry::expiring_window_end;
use super::status::{classify, split_at};
use super::{BookingDetails, Engine, EngineError};

impl Engine {
    /// Occupancy of every resource as seen by `email`, in resource id order.
    pub async fn get_stage_info_for_visitor(&self, email: &str) -> Result<Vec<StageInfo>, EngineError> {
        let now = self.now();
        let resources = self.repos.resources.list().await?;
        // One pass over the bookings, grouped by resource in ascending id order.
        let mut by_resource: HashMap<String, Vec<Booking>> = HashMap::new();
        for booking in self.repos.bookings.list().await? {
            by_resource.entry(booking.resource_name.clone()).or_default().push(booking);
        }
        let mut infos = Vec::with_capacity(resources.len());
        for resource in &resources {
            let bookings = by_resource.remove(&resource.name).unwrap_or_default();
            let (current, future) = split_at(&resource.name, bookings, now)?;
            infos.push(classify(resource, current.as_ref(), &future, email));
        }
        Ok(infos)
    }

    /// Bookings whose return date has passed (`return_date <= now`).
    pub async fn get_all_expired_records(&self) -> Result<Vec<Booking>, EngineError> {
        Ok(self.repos.bookings.list_returning_between(None, self.now()).await?)
    }

    /// Bookings still running that end no later than the close of the
    /// calendar day `days` days from now.
    pub async fn get_all_expiring_records(&self, days: i64) -> Result<Vec<Booking>, EngineError> {
        if !(0..=MAX_EXPIRING_DAYS).contains(&days) {
            return Err(EngineError::LimitExceeded("expiring look-ahead out of range"));
        }
        let now = self.now();
        let end = expiring_window_end(now, days as u64);
        Ok(self.repos.bookings.list_returning_between(Some(now), end).await?)
    }

    pub async fn needs_registration(&self, external_id: i64) -> Result<bool, EngineError> {
        Ok(self.repos.visitors.get_by_external_id(external_id).await?.is_none())
    }

    pub async fn get_resource(&self, name: &str) -> Result<Option<Resource>, EngineError> {
        Ok(self.repos.resources.get(name).await?)
    }

    pub async fn get_resource_by_id(&self, id: ResourceId) -> Result<Option<Resource>, EngineError> {
        Ok(self.repos.resources.get_by_id(id).await?)
    }

    pub async fn get_visitor(&self, email: &str) -> Result<Option<Visitor>, EngineError> {
        Ok(self.repos.visitors.get(email).await?)
    }

    pub async fn get_visitor_by_external_id(&self, external_id: i64) -> Result<Option<Visitor>, EngineError> {
        Ok(self.repos.visitors.get_by_external_id(external_id).await?)
    }

    /// A live booking with its visitor and resource resolved.
    pub async fn get_booking(&self, id: BookingId) -> Result<Option<BookingDetails>, EngineError> {
        let Some(booking) = self.repos.bookings.get(id).await? else {
            return Ok(None);
        };
        let visitor = self.repos.visitors.get(&booking.email).await?;
        let resource = self.repos.resources.get(&booking.resource_name).await?;
        Ok(Some(BookingDetails { booking, visitor, resource }))
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, EngineError> {
        Ok(self.repos.resources.list().await?)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, EngineError> {
        Ok(self.repos.categories.list().await?)
    }

    /// Resources of a category. `NotFound` when the category does not exist.
    pub async fn resources_in_category(&self, category: &str) -> Result<Vec<Resource>, EngineError> {
        if self.repos.categories.get(category).await?.is_none() {
            return Err(EngineError::NotFound(format!("category {category}")));
        }
        Ok(self.repos.resources.list_in_category(category).await?)
    }

    pub async fn future_bookings_for_resource(&self, resource_name: &str) -> Result<Vec<Booking>, EngineError> {
        Ok(self
            .repos
            .bookings
            .list_future_for_resource(resource_name, self.now())
            .await?)
    }

    pub async fn future_bookings_for_visitor(&self, email: &str) -> Result<Vec<Booking>, EngineError> {
        Ok(self.repos.bookings.list_future_for_visitor(email, self.now()).await?)
    }

    /// The booking running now on `resource_name`, if any, and the ones after it.
    pub async fn current_and_future_bookings(
        &self,
        resource_name: &str,
    ) -> Result<(Option<Booking>, Vec<Booking>), EngineError> {
        let bookings = self.repos.bookings.list_for_resource(resource_name).await?;
        split_at(resource_name, bookings, self.now())
    }

    pub async fn closed_bookings_for_visitor(&self, email: &str) -> Result<Vec<ClosedBooking>, EngineError> {
        Ok(self.repos.closed.list_for_visitor(email).await?)
    }

    pub async fn closed_bookings_for_resource(&self, resource_name: &str) -> Result<Vec<ClosedBooking>, EngineError> {
        Ok(self.repos.closed.list_for_resource(resource_name).await?)
    }
}
