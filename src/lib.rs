//! Personalized item recommendations served from a continuously ingested
//! stream of interaction events.
//!
//! Events are batched into an append-only interaction log, periodic jobs turn
//! the log into candidate tiers (global top items, per-user model picks and
//! per-user novel items), and the composer merges those tiers into a fixed-size
//! answer per request.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
