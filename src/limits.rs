pub const MAX_SERVICES_PER_BOOKING: usize = 16;
pub const MAX_SERVICES_PER_BUSINESS: usize = 2_000;
pub const MAX_STAFF_PER_BUSINESS: usize = 1_000;
pub const MAX_PROMOTIONS_PER_BUSINESS: usize = 10_000;
pub const MAX_WINDOWS_PER_DAY: usize = 8;
pub const MAX_APPOINTMENTS_PER_STAFF_DAY: usize = 288;
pub const MAX_CODE_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_TIP: i64 = 100_000_000;
/// Largest price or fixed amount, in minor units. A full booking at this price
/// times a percentage still fits in an i64.
pub const MAX_PRICE: i64 = 1_000_000_000_000;

const _: () = assert!((MAX_SERVICES_PER_BOOKING as i64) * MAX_PRICE * 100 + MAX_TIP < i64::MAX);
