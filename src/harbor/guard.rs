//! Capability check applied before every mutation.
//!
//! The check compares identities only. It never looks at the values being
//! written and holds no state between calls.

use crate::core::error::HarborError;
use crate::harbor::types::Identity;

/// A record with a single identity allowed to mutate it.
pub trait Owned {
    fn owner(&self) -> &Identity;
}

pub fn require_owner<R: Owned + ?Sized>(
    caller: &Identity,
    record: &R,
    op: &str,
) -> Result<(), HarborError> {
    require_identity(caller, record.owner(), op)
}

pub fn require_identity(
    caller: &Identity,
    required: &Identity,
    op: &str,
) -> Result<(), HarborError> {
    if caller != required {
        return Err(HarborError::Unauthorized {
            op: op.to_string(),
            caller: caller.to_string(),
        });
    }
    Ok(())
}
