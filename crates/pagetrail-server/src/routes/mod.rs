pub mod analytics;
pub mod health;
pub mod tracked;
pub mod visits;
