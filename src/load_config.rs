use std::fs;
use std::path::Path;

use anyhow::Result;
use box_traverse_core::config::TraverseConfig;
use box_traverse_core::error::ConfigError;
use tracing::{error, info};

pub const CLIENT_ID_VAR: &str = "BOX_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "BOX_CLIENT_SECRET";
pub const ENTERPRISE_ID_VAR: &str = "BOX_ENTERPRISE_ID";

/// Loads the YAML (or JSON) config file and overlays the Box credentials from the environment.
///
/// Every `BOX_*` variable that is set replaces the matching `boxAppSettings` key. The result is
/// validated before it is returned, so callers get either a runnable config or an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TraverseConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: TraverseConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let settings = &mut config.box_app_settings;
    for (var, slot) in [
        (CLIENT_ID_VAR, &mut settings.client_id),
        (CLIENT_SECRET_VAR, &mut settings.client_secret),
        (ENTERPRISE_ID_VAR, &mut settings.enterprise_id),
    ] {
        if let Ok(value) = std::env::var(var) {
            info!(var, "Box credential found in env");
            *slot = value;
        }
    }

    for (key, value) in [
        ("boxAppSettings.clientID", &settings.client_id),
        ("boxAppSettings.clientSecret", &settings.client_secret),
        ("boxAppSettings.enterpriseID", &settings.enterprise_id),
    ] {
        if value.trim().is_empty() {
            error!(key, "Box credential missing from config and env");
            return Err(ConfigError::MissingCredential(key).into());
        }
    }

    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Invalid configuration");
        return Err(e.into());
    }

    config.trace_loaded();
    info!(
        config_path = ?path_ref,
        enterprise_id = %config.box_app_settings.enterprise_id,
        "Config loaded and merged successfully"
    );
    Ok(config)
}
