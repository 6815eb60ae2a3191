//! The `config` module loads the process configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `config/default.toml`
//! (optional), then `ZILMQTT__SECTION__KEY` environment variables.

mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;
use settings::PartialSettings;

pub use settings::{
    BalancerSettings, DlxSettings, LedgerSettings, LogSettings, RegistrySettings, ServerSettings,
    Settings,
};

/// Loads the configuration from the default file and environment variables
/// and merges it over `Settings::default()`.
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("ZILMQTT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let partial: PartialSettings = builder.build()?.try_deserialize()?;
    Ok(partial.merge_onto(Settings::default()))
}

#[cfg(test)]
mod tests;
