//! Core engine: configuration, ingest and bootstrap

pub mod bootstrap;
pub mod config;
pub mod ingest;
