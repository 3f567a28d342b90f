//! Bucket/object lifecycle orchestration and the storage backends it runs
//! against.

pub mod backend;
pub mod bucket_manager;
pub mod error;
pub mod local_backend;
pub mod naming;
pub mod object_gateway;
pub mod s3_backend;
pub mod url_signer;

#[cfg(test)]
pub(crate) mod testing;
