//! Input limits enforced at the engine boundary.

/// Max length of resource and category names.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a visitor email.
pub const MAX_EMAIL_LEN: usize = 320;

/// Max length of free-text fields (comment, address, external id, username).
pub const MAX_TEXT_LEN: usize = 4096;

/// Max look-ahead of the expiring-soon query, in days.
pub const MAX_EXPIRING_DAYS: i64 = 366;

/// Look-ahead used when the caller has no preference.
pub const DEFAULT_EXPIRING_DAYS: i64 = 2;

/// Max bookings accepted by a single bulk delete.
pub const MAX_DELETE_BATCH: usize = 10_000;
