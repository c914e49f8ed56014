//! Stampede-safe response caching for axum with tag-group bookkeeping.
//!
//! See [`cache`] for the caching layer itself; [`config`] and [`infra`] wire it into the
//! demo server binary.

pub mod cache;
pub mod config;
pub mod infra;
