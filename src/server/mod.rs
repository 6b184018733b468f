//! Server module for Switchyard
//!
//! # Module Structure
//!
//! - `config`: Application configuration
//! - `loader`: Configuration loading from files and environment
//! - `agents`: Built-in agents registered at startup
//! - `init`: Fabric startup and the main run loop

mod agents;
pub mod config;
mod init;
mod loader;

pub use init::{run, start_fabric};
pub use loader::{load_config, DEFAULT_CONFIG};
