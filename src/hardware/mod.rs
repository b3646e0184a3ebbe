//! Hardware models.
//!
//! `mock` holds the byte-level firmware simulator behind
//! [`MockAdapter`](crate::adapters::MockAdapter).

pub mod mock;
