//! Data models shared between the GUI and the worker.
//! Job and configuration files serialize to/from JSON with these types.

mod clip;
mod config;
mod engine;
mod progress_info;
mod rational;
mod video_job;

pub use clip::*;
pub use config::*;
pub use engine::*;
pub use progress_info::*;
pub use rational::*;
pub use video_job::*;
