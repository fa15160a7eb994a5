//! Application services: listing handlers and their query boundaries.

pub mod error;
pub mod listings;
pub mod repos;
