pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logs;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod registry;
pub mod settings;
pub mod watch;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunRequest};
