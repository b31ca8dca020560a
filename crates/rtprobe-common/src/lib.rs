#![doc = "Common types shared across the rtprobe workspace."]

pub mod config;
pub mod error;
pub mod samples;
pub mod state;
pub mod stats;
pub mod time;

pub use config::*;
pub use error::*;
pub use samples::*;
pub use state::*;
pub use stats::*;
pub use time::*;
