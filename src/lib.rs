//! whereabouts - rate-limited, cached account location lookups.
//!
//! The [`coordinator::Coordinator`] funnels lookups from any number of
//! concurrent callers into a deduplicated, cached, one-at-a-time stream of
//! upstream calls, and backs off globally when the upstream rate limits.

pub mod config;
pub mod coordinator;
pub mod models;
pub mod store;
pub mod upstream;
