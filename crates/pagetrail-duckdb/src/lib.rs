pub mod backend;
pub mod queries;
pub mod schema;
pub mod store_impl;
pub mod visits;

pub use backend::DuckDbBackend;
