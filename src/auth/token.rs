//! Token records, redacted secrets, and derived connection health.

pub mod health;
pub mod record;
pub mod secret;
