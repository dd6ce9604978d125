pub mod aggregate;
pub mod analytics;
pub mod config;
pub mod device;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod routes;
pub mod store;
pub mod visit;
