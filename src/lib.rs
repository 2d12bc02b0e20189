//! DOJ Fetcher Library
//!
//! A library for discovering and downloading document sets from the DOJ
//! disclosures archive. Dataset extents are found with a logarithmic
//! boundary search; downloads run through a rate-limited, retrying pipeline
//! with resumable state between runs.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
