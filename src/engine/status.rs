use crate::model::*;

use super::EngineError;

/// Return date of the last booking in the first unbroken run of consecutive
/// days. `bookings` must be sorted by take date; a booking continues the run
/// when it is taken on the calendar day right after the previous one ends.
pub fn last_booked_day_in_row<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Option<Ts> {
    let mut iter = bookings.into_iter();
    let mut end = iter.next()?;
    for next in iter {
        if next_day(utc_day(end.return_date)) != utc_day(next.take_date) {
            break;
        }
        end = next;
    }
    Some(end.return_date)
}

/// Split one resource's bookings into the booking active at `now` and the
/// bookings that start after `now` (sorted by take date).
///
/// Two active bookings on one resource means the store is broken.
pub fn split_at(
    resource_name: &str,
    bookings: Vec<Booking>,
    now: Ts,
) -> Result<(Option<Booking>, Vec<Booking>), EngineError> {
    let mut current: Option<Booking> = None;
    let mut future = Vec::new();
    for booking in bookings {
        if booking.is_active_at(now) {
            if let Some(first) = &current {
                tracing::error!(
                    "resource {resource_name} has overlapping active bookings {} and {}",
                    first.id,
                    booking.id
                );
                return Err(EngineError::InvariantViolation(format!(
                    "resource {resource_name} has more than one active booking ({} and {})",
                    first.id, booking.id
                )));
            }
            current = Some(booking);
        } else if booking.take_date > now {
            future.push(booking);
        }
    }
    future.sort_by(|a, b| a.take_date.cmp(&b.take_date).then(a.id.cmp(&b.id)));
    Ok((current, future))
}

/// Occupancy of `resource` for `viewer`, from its active booking and its
/// future bookings sorted by take date.
pub fn classify(resource: &Resource, current: Option<&Booking>, future: &[Booking], viewer: &str) -> StageInfo {
    let mut info = StageInfo {
        resource_id: resource.id,
        name: resource.name.clone(),
        current_take_date: current.map(|b| b.take_date),
        current_return_date: current.map(|b| b.return_date),
        status: Status::NoOne,
        first_booked_day_in_future: None,
        last_booked_day_in_row: None,
    };
    match current {
        Some(active) if active.email == viewer => info.status = Status::Yours,
        Some(active) => {
            info.status = Status::Others;
            info.last_booked_day_in_row = last_booked_day_in_row(std::iter::once(active).chain(future));
        }
        None => {
            if let Some(first) = future.first() {
                info.status = Status::WillBeTaken;
                info.first_booked_day_in_future = Some(first.take_date);
            }
        }
    }
    info
}
