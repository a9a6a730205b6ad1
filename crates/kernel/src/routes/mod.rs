//! HTTP route handlers.

pub mod admin_check;
pub mod health;
pub mod metrics;
pub mod upstream;
