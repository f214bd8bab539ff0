//! Gatekeeper - Fixed-Window Admission Control
//!
//! This crate decides, per incoming request, whether to admit or reject it
//! under a named fixed-window policy. Counts live in Redis so every process
//! instance shares them; when Redis is unreachable the count falls back to an
//! in-process store, and when no store can count the request it is admitted.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
