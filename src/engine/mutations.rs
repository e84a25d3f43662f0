use std::time::Instant;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::StoreError;

use super::conflict::{find_conflict, validate_name, validate_span, validate_text};
use super::{Engine, EngineError, Returned, TakeOutcome};

impl Engine {
    /// Book `resource_name` for the visitor bound to `visitor_external_id`
    /// over `[since, until]`, unless an existing booking collides.
    pub async fn take(
        &self,
        resource_name: &str,
        visitor_external_id: i64,
        since: Ts,
        until: Ts,
    ) -> Result<TakeOutcome, EngineError> {
        let started = Instant::now();
        let span = validate_span(since, until)?;
        let outcome = self.take_inner(resource_name, visitor_external_id, span).await?;

        metrics::counter!(observability::TAKES_TOTAL, "outcome" => observability::take_label(&outcome))
            .increment(1);
        metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => "take")
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn take_inner(
        &self,
        resource_name: &str,
        visitor_external_id: i64,
        span: Span,
    ) -> Result<TakeOutcome, EngineError> {
        let Some(resource) = self.repos.resources.get(resource_name).await? else {
            return Ok(TakeOutcome::UnknownResource);
        };
        let Some(visitor) = self.repos.visitors.get_by_external_id(visitor_external_id).await? else {
            return Ok(TakeOutcome::UnknownVisitor);
        };

        let _guard = self.lock_resource(&resource.name).await;

        let existing = self.repos.bookings.list_for_resource(&resource.name).await?;
        if let Some(conflicting) = find_conflict(&span, &existing) {
            tracing::debug!(
                "take of {} by {} refused: collides with booking {}",
                resource.name,
                visitor.email,
                conflicting.id
            );
            return Ok(TakeOutcome::Conflict { conflicting: conflicting.clone(), resource });
        }

        let booking = self
            .repos
            .bookings
            .add(NewBooking {
                resource_name: resource.name.clone(),
                email: visitor.email.clone(),
                span,
                created_at: self.now(),
            })
            .await?;
        tracing::info!(
            "booking {} created: {} taken by {} from {} to {}",
            booking.id,
            resource.name,
            visitor.email,
            booking.take_date,
            booking.return_date
        );
        self.notify.send(Notice::Taken { booking: booking.clone() });
        Ok(TakeOutcome::Taken { resource, booking })
    }

    /// End a booking now. Only its owner or an admin may do so; anything else
    /// (unknown requester, missing booking, somebody else's booking) yields
    /// `None` and leaves the store alone.
    pub async fn return_booking(
        &self,
        booking_id: BookingId,
        requester_external_id: i64,
    ) -> Result<Option<Returned>, EngineError> {
        let started = Instant::now();
        let returned = self.return_inner(booking_id, requester_external_id).await?;

        let outcome = if returned.is_some() { "returned" } else { "refused" };
        metrics::counter!(observability::RETURNS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => "return")
            .record(started.elapsed().as_secs_f64());
        Ok(returned)
    }

    async fn return_inner(
        &self,
        booking_id: BookingId,
        requester_external_id: i64,
    ) -> Result<Option<Returned>, EngineError> {
        let Some(requester) = self.repos.visitors.get_by_external_id(requester_external_id).await? else {
            tracing::debug!("return of booking {booking_id} refused: unknown requester {requester_external_id}");
            return Ok(None);
        };
        let Some(booking) = self.repos.bookings.get(booking_id).await? else {
            tracing::debug!("return of booking {booking_id} refused: no such booking");
            return Ok(None);
        };

        let _guard = self.lock_resource(&booking.resource_name).await;

        // Re-read under the lock: a concurrent return or sweep may have won.
        let Some(booking) = self.repos.bookings.get(booking_id).await? else {
            return Ok(None);
        };
        if booking.email != requester.email && !requester.is_admin {
            tracing::debug!(
                "return of booking {booking_id} refused: {} is neither owner nor admin",
                requester.email
            );
            return Ok(None);
        }

        let resource = self
            .repos
            .resources
            .get(&booking.resource_name)
            .await?
            .ok_or_else(|| {
                tracing::error!("booking {booking_id} points at missing resource {}", booking.resource_name);
                EngineError::InvariantViolation(format!(
                    "booking {booking_id} references unknown resource {}",
                    booking.resource_name
                ))
            })?;

        let Some(closed) = self.repos.bookings.close(booking_id, self.now()).await? else {
            return Ok(None);
        };
        tracing::info!(
            "booking {booking_id} returned: {} released by {}",
            resource.name,
            requester.email
        );
        self.notify.send(Notice::Returned { closed: closed.clone() });
        Ok(Some(Returned { booking, closed, resource }))
    }

    /// Remove `records` from the live bookings. Records already gone are
    /// skipped. Returns the input list.
    pub async fn delete_records(&self, records: Vec<Booking>) -> Result<Vec<Booking>, EngineError> {
        self.remove_each(&records, |_| {}).await?;
        Ok(records)
    }

    /// Remove `records` and announce each one actually removed as expired.
    /// A record returned or deleted meanwhile is skipped silently.
    pub async fn release_expired(&self, records: &[Booking]) -> Result<Vec<Booking>, EngineError> {
        self.remove_each(records, |booking| {
            self.notify.send(Notice::Expired { booking: booking.clone() });
        })
        .await
    }

    /// Delete each record under its resource lock; `on_removed` runs right
    /// after every delete that found a live booking.
    async fn remove_each(
        &self,
        records: &[Booking],
        on_removed: impl Fn(&Booking),
    ) -> Result<Vec<Booking>, EngineError> {
        if records.len() > MAX_DELETE_BATCH {
            return Err(EngineError::LimitExceeded("delete batch too large"));
        }
        let started = Instant::now();
        let mut removed = Vec::new();
        for record in records {
            // Lock by the stored booking's resource, never by a caller-supplied name.
            let Some(live) = self.repos.bookings.get(record.id).await? else {
                continue;
            };
            let _guard = self.lock_resource(&live.resource_name).await;
            if let Some(booking) = self.repos.bookings.delete(record.id).await? {
                on_removed(&booking);
                removed.push(booking);
            }
        }
        if !removed.is_empty() {
            tracing::info!("deleted {} of {} booking records", removed.len(), records.len());
        }
        metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => "delete")
            .record(started.elapsed().as_secs_f64());
        Ok(removed)
    }

    pub async fn create_category(&self, name: &str) -> Result<Category, EngineError> {
        validate_name(name)?;
        let category = Category { name: name.to_string(), created_at: self.now() };
        self.repos.categories.add(category.clone()).await?;
        tracing::info!("category {name} created");
        Ok(category)
    }

    /// Register a resource, creating its category on first use.
    pub async fn create_resource(&self, resource: NewResource) -> Result<Resource, EngineError> {
        validate_name(&resource.name)?;
        validate_name(&resource.category)?;
        validate_text(resource.comment.as_ref())?;
        validate_text(resource.address.as_ref())?;
        validate_text(resource.external_id.as_ref())?;

        if self.repos.categories.get(&resource.category).await?.is_none() {
            match self.create_category(&resource.category).await {
                Ok(_) | Err(EngineError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let created = self.repos.resources.add(resource, self.now()).await?;
        tracing::info!("resource {} created with id {}", created.name, created.id);
        Ok(created)
    }

    /// Insert or update the visitor identified by `registration.email`.
    pub async fn register_visitor(&self, registration: Registration) -> Result<Visitor, EngineError> {
        if registration.email.len() > MAX_EMAIL_LEN || !self.policy.is_valid_email(&registration.email) {
            return Err(EngineError::InvalidEmail(registration.email));
        }
        validate_text(registration.full_name.as_ref())?;
        validate_text(registration.username.as_ref())?;
        validate_text(registration.comment.as_ref())?;

        let now = self.now();
        let existing = self.repos.visitors.get(&registration.email).await?;
        let is_admin = registration.is_admin || self.policy.is_configured_admin(&registration.email);
        let visitor = match existing {
            Some(prev) => Visitor {
                is_admin,
                external_id: Some(registration.external_id),
                chat_id: registration.chat_id.or(prev.chat_id),
                full_name: registration.full_name.or(prev.full_name),
                username: registration.username.or(prev.username),
                comment: registration.comment.or(prev.comment),
                updated_at: now,
                ..prev
            },
            None => Visitor {
                email: registration.email,
                is_admin,
                external_id: Some(registration.external_id),
                chat_id: registration.chat_id,
                full_name: registration.full_name,
                username: registration.username,
                comment: registration.comment,
                created_at: now,
                updated_at: now,
            },
        };

        match self.repos.visitors.save(visitor.clone()).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(key)) => {
                tracing::debug!("registration of {} refused: {key} is bound elsewhere", visitor.email);
                return Err(EngineError::AlreadyExists(key));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!("visitor {} registered (admin: {})", visitor.email, visitor.is_admin);
        Ok(visitor)
    }
}
