pub mod adapters;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod normalize;
pub mod orchestrator;
pub mod region;
pub mod schema;
