mod collection_config;
mod run_config;

pub use collection_config::{load_or_default, CollectionConfig};
pub use run_config::RunConfig;
