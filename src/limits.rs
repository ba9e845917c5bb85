//! Hard caps enforced by the engine. All are compile-time constants; a
//! deployment that needs different values recompiles.

use crate::model::Ms;

/// 2000-01-01T00:00:00Z; anything earlier is a malformed timestamp.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One appointment may span at most 30 days.
pub const MAX_RANGE_DURATION_MS: Ms = 30 * 24 * 3_600_000;

/// Widest allowed filter/availability query window (one year).
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_RESOURCES_PER_APPOINTMENT: usize = 64;

pub const MAX_FIXED_RESOURCES_PER_ROOM: usize = 256;

pub const MAX_SLOTS_PER_ROOM: usize = 100_000;

pub const MAX_WINDOWS_PER_RESOURCE: usize = 100_000;
