//! Read-through caching for listing endpoints.
//!
//! [`cache`] holds the key scheme, tag bookkeeping and the read-through
//! wrapper; [`application::listings`] binds each listing to its key, tags
//! and TTL; [`infra`] provides Redis, Postgres and the warmer.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
