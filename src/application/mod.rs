//! Application services: dispatch pipeline, render service and their events.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod render;
pub mod repos;
