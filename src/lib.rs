//! halo-gate - request admission for the HALO API
//!
//! This crate decides whether an inbound HTTP request may proceed. Requests
//! are grouped into policy buckets and counted per client identity, either in
//! process memory or in a Redis server shared by every API instance.

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod ratelimit;
