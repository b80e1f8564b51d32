//! Repricer: keeps marketplace listings just under the cheapest competitor.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod crawler;
pub mod engine;
pub mod marketplace;
pub mod pricing;
pub mod retry;
pub mod sheets;
pub mod types;
