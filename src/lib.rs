//! tscoord - query coordination for a time series database
//!
//! This crate compiles a graph of query operations into an executable
//! pipeline, runs its data sources concurrently against one or more storage
//! backends, and fans writes out across those backends.

pub mod config;
pub mod execution;
pub mod metrics;
pub mod models;
pub mod query;
pub mod storage;
