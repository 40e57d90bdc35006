pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    AggregatorConfig, Config, DispatcherConfig, EnrichmentConfig, DEFAULT_MAX_UPLOAD_BYTES,
};
