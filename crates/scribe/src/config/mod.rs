pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, resolve_secret};
pub use schema::{
    Config, ExportConfig, LoggingConfig, PollerConfig, ProcessingConfig, ProviderConfig,
    RetryConfig,
};
