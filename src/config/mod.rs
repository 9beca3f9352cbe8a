pub mod settings;

pub use settings::CacheSettings;

use crate::error::CacheError;
use std::sync::Arc;

/// Loads `.env` if present, then builds, validates and logs the cache settings.
pub fn load_config() -> Result<Arc<CacheSettings>, CacheError> {
    dotenv::dotenv().ok(); // Load .env file if present, ignore errors

    let config = CacheSettings::from_env();
    config.validate()?;
    config.log_settings();

    Ok(Arc::new(config))
}
