//! Bucket and object gateway in front of S3-compatible storage.
//!
//! The service layer ([`services`]) owns bucket lifecycle and object
//! transfer; the HTTP layer ([`routes`], [`handlers`]) exposes it as JSON.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
