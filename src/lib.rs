//! Content rendering server with a dependency-aware render cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
