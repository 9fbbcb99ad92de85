//! budgetsync host application: configuration, engine wiring, the HTTP relay
//! provider and the relay server shared by the `budgetsync` and
//! `budgetsync-relay` binaries.

pub mod config;
pub mod engine;
pub mod http_provider;
pub mod relay;

pub use config::{Config, ConfigError, ConfigSource, ConfigValue, ProviderConfig};
pub use engine::{DataPaths, EngineError};
pub use http_provider::HttpRelayProvider;
