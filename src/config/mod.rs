mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{HttpSettings, LogSettings, RetrySettings, Settings, XmppSettings};

/// Prefix of environment variables read by `load_config`, e.g.
/// `FCMPUSH__HTTP__API_KEY`.
pub const ENV_PREFIX: &str = "FCMPUSH";

/// Loads the configuration from the default file, a `.env` file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the transport, retry and logging configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
