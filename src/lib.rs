//! Marketgate - Rate Limiting for the Marketplace API
//!
//! This crate implements the fixed-window rate limiter that guards the
//! marketplace's HTTP routes. Counters live in Redis so every instance shares
//! them, with a process-local store as the fallback when Redis is unavailable.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
