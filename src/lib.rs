//! Tollgate - Strategy-Based Rate Limiting
//!
//! This crate resolves loosely-typed limiter configuration into factories
//! that stamp out per-key rate limiters. Two admission strategies are
//! provided, token bucket and fixed window, with all state held behind a
//! pluggable storage trait so limiters created anywhere agree on what an
//! identity has consumed.

pub mod config;
pub mod factory;
pub mod limiter;
pub mod storage;
pub mod lock;
pub mod interval;
pub mod error;
