use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Widest window a slot query may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
/// Longest single appointment or block.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;

pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_LOCATION_NAME_LEN: usize = 256;
