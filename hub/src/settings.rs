//! Startup options for the hub daemon.
//!
//! Values come from an optional file (any format the `config` crate reads) and
//! are overridden by `FXHUB_*` environment variables, e.g.
//! `FXHUB_PUBLISH_INTERVAL=0.5`. Anything not set keeps its default.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use fxnode_core::HubConfig;
use std::path::Path;

pub const ENV_PREFIX: &str = "FXHUB";

/// Loads and validates the hub options.
///
/// # Arguments
///
/// * `path` - Optional configuration file. When given it must exist.
pub fn load(path: Option<&Path>) -> Result<HubConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let settings = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to read hub configuration")?;
    let options: HubConfig = settings
        .try_deserialize()
        .context("Invalid hub configuration")?;
    options.validate().map_err(anyhow::Error::msg)?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_toml("publish_interval = 0.5\nsubscription_ttl = 20\n");
        let options = load(Some(file.path())).unwrap();
        assert_eq!(options.publish_interval, 0.5);
        assert_eq!(options.subscription_ttl, 20.0);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = write_toml("publish_interval = 0\n");
        assert!(load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/hub.toml"))).is_err());
    }
}
