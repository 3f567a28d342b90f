//! Data models exchanged between the HTTP layer, the gateway services and the
//! storage backends.
//!
//! Buckets and objects are ephemeral views of backend state. Nothing here is
//! cached between calls.

pub mod bucket;
pub mod object;
pub mod payload;
