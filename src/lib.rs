//! Retrievia service scaffold: HTTP API with health probes, environment
//! settings, structured logging and a background task worker.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod runtime;
pub mod worker;
