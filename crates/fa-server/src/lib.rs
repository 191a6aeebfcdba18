//! Flight assurance analysis service.

pub mod api;
pub mod cache;
pub mod config;
pub mod jobs;
pub mod population;
pub mod state;
pub mod terrain;
