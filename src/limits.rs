//! Input bounds enforced at the engine boundary.

/// Max length of any free-text occupant or payment field.
pub const MAX_FIELD_LEN: usize = 256;

/// Max length of a search query.
pub const MAX_QUERY_LEN: usize = 128;

/// Max length of an authorization code presented with a payment.
pub const MAX_CODE_LEN: usize = 128;

/// Largest single payment accepted.
pub const MAX_PAYMENT_AMOUNT: i64 = 10_000_000;

/// Floors, rooms and beds are numbered from 1 and never exceed this.
pub const MAX_COORDINATE_PART: u32 = 10_000;

/// Append attempts before a write is reported as storage-unavailable.
pub const WAL_RETRY_ATTEMPTS: u32 = 3;

/// Delay before the first append retry; doubles on each further attempt.
pub const WAL_RETRY_BASE_DELAY_MS: u64 = 20;
