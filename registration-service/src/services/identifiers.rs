//! Order and submission identifiers.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;

use crate::error::StoreError;
use crate::services::repository::RegistrationStore;

pub const ORDER_PREFIX: &str = "RYLS";
pub const MAX_ORDER_ID_LEN: usize = 50;
const ORDER_SUFFIX_LEN: usize = 8;
const MAX_ALLOCATION_ATTEMPTS: usize = 5;

/// `RYLS` + zero-padded sequence (at least 4 digits) + uppercase suffix.
pub fn format_order_id(sequence: i64, suffix: &str) -> String {
    format!("{ORDER_PREFIX}{sequence:04}{suffix}")
}

fn random_uppercase(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect()
}

/// Whether `order_id` has the `^RYLS[0-9]{4,}[A-Z]{0,8}$` shape.
pub fn is_valid_order_id(order_id: &str) -> bool {
    let Some(rest) = order_id.strip_prefix(ORDER_PREFIX) else {
        return false;
    };
    if order_id.len() > MAX_ORDER_ID_LEN {
        return false;
    }
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let letters = &rest[digits..];
    digits >= 4
        && letters.len() <= ORDER_SUFFIX_LEN
        && letters.chars().all(|c| c.is_ascii_uppercase())
}

/// Allocate a fresh order id from the database sequence.
///
/// The unique index on `payments.order_id` is the final guard; a suffix
/// collision seen here is retried with a new sequence value.
pub async fn allocate_order_id(store: &dyn RegistrationStore) -> Result<String, StoreError> {
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let sequence = store.next_order_sequence().await?;
        let order_id = format_order_id(sequence, &random_uppercase(ORDER_SUFFIX_LEN));
        if order_id.len() <= MAX_ORDER_ID_LEN && !store.order_id_exists(&order_id).await? {
            return Ok(order_id);
        }
        tracing::warn!(order_id = %order_id, "Order id collision, retrying");
    }
    Err(StoreError::OrderIdTaken)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// `RYLS-<base36 millis>-<base36 random>`.
pub fn new_submission_id(now: DateTime<Utc>) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let random: u64 = OsRng.gen_range(36u64.pow(5)..36u64.pow(6));
    format!("{ORDER_PREFIX}-{}-{}", to_base36(millis), to_base36(random))
}

/// Whether `value` looks like a submission id.
pub fn is_submission_id(value: &str) -> bool {
    let mut parts = value.split('-');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(ORDER_PREFIX), Some(ts), Some(rand), None)
            if !ts.is_empty()
                && !rand.is_empty()
                && ts.chars().chain(rand.chars()).all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    )
}
