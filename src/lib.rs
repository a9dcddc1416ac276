//! Tapglue: activity feeds and connection graphs for mobile social applications
//!
//! Accounts own applications, applications own end-users, end-users follow each other
//! and publish events. Everything lives in a Redis-compatible key/value store.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod graph;
pub mod keys;
pub mod kv;
pub mod minter;
pub mod rate_limit;
pub mod request;
pub mod server;
pub mod store;
