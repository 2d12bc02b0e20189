//! Command-line interface components
//!
//! CLI-specific code: argument parsing, command handlers, and the progress
//! display wiring around the engine.

pub mod args;
pub mod commands;

pub use args::{
    CleanArgs, Cli, Commands, DiscoverArgs, DownloadArgs, GlobalArgs, QueryFilesArgs, StatsArgs,
};
pub use commands::{
    handle_clean, handle_discover, handle_download, handle_query_files, handle_stats,
};
