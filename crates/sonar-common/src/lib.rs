#![doc = "Common types shared across the sonar-rt workspace."]

pub mod config;
pub mod distance;
pub mod error;
pub mod metrics;
pub mod state;
pub mod time;

pub use config::*;
pub use distance::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
pub use time::*;
