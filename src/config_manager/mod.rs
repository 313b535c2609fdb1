mod config;

pub use config::{Config, ConfigFile, ConfigManager};
