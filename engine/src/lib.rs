pub mod app;
pub mod config;
pub mod game;
pub mod main;

pub use app::Engine;
pub use config::{ConfigError, EngineConfig};
