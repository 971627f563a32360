//! facegate-engine: configuration and an async handle that runs the face
//! matcher on a dedicated thread.

pub mod config;
pub mod engine;

pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineStatus};
