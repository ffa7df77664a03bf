pub mod config;
pub mod duration;

pub use config::LabConfig;
pub use duration::{DurationError, parse_duration};
