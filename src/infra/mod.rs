//! Infrastructure adapters and runtime bootstrap.

pub mod app;
pub mod error;
pub mod graph;
pub mod http;
pub mod renderer;
pub mod routes;
pub mod telemetry;
