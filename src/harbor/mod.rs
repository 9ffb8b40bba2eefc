//! Registry domain: allow-listed chains, agreements, and adoptions.
//!
//! Every entry point takes a [`Store`](crate::core::store::Store) and routes
//! through the broker; none of these modules open connections themselves.

pub mod adoption;
pub mod agreement;
pub mod construct;
pub mod document;
pub mod events;
pub mod guard;
pub mod limits;
pub mod registry;
pub mod types;
