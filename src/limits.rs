//! Hard limits on untrusted input. Everything arriving over the wire is
//! checked against these before it reaches a session lock.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_SESSIONS_PER_TENANT: usize = 100_000;
pub const MAX_SESSION_CAPACITY: u32 = 10_000;
/// Bookings are never deleted, so this also bounds the audit history.
pub const MAX_BOOKINGS_PER_SESSION: usize = 50_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A class occurrence longer than a day is a data error.
pub const MAX_SESSION_DURATION_MS: Ms = 24 * 3_600_000;

pub const MAX_CODE_LEN: usize = 512;
pub const MAX_CREDITS_GRANT: u32 = 10_000;
