//! SUPERFECTA: pari-mutuel superfecta decision engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod strategy;
pub mod platforms;
pub mod data;
pub mod resilience;
pub mod engine;
pub mod storage;
