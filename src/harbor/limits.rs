//! Per-operation write bound.
//!
//! A mutating operation carries its payload in one bounded write. The payload
//! is measured as its JSON encoding, the same encoding the construction planner
//! uses to size batches.

use crate::core::config::LimitsConfig;
use crate::core::error::HarborError;
use serde::Serialize;

pub fn payload_size<T: Serialize + ?Sized>(payload: &T) -> Result<usize, HarborError> {
    Ok(serde_json::to_vec(payload)?.len())
}

pub fn fits<T: Serialize + ?Sized>(limits: &LimitsConfig, payload: &T) -> Result<bool, HarborError> {
    Ok(payload_size(payload)? <= limits.max_write_bytes)
}

/// Fail with `PayloadTooLarge` before any part of the payload is written.
pub fn check_write<T: Serialize + ?Sized>(
    limits: &LimitsConfig,
    op: &str,
    payload: &T,
) -> Result<usize, HarborError> {
    let size = payload_size(payload)?;
    if size > limits.max_write_bytes {
        return Err(HarborError::PayloadTooLarge {
            op: op.to_string(),
            size,
            limit: limits.max_write_bytes,
        });
    }
    Ok(size)
}
