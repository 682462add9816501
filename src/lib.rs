//! Conflux: contact aggregation.
//!
//! Raw contacts arrive from several accounts; the aggregator groups the ones
//! that describe the same person into aggregates and keeps their derived
//! fields current.

pub mod aggregation;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod normalize;
