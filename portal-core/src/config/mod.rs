//! Layered configuration loading shared by portal binaries.
//!
//! Sources, lowest precedence first:
//! 1. `<service>/config/base.yaml` (required)
//! 2. `<service>/config/<APP_ENVIRONMENT>.yaml` (optional)
//! 3. `APP_*` environment variables, `__` separating nested keys
use crate::error::AppError;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

pub const ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

/// Resolve the configuration directory for `service`, whether the process was
/// started from the workspace root or from inside the service directory.
pub fn configuration_directory(base_path: &Path, service: &str) -> PathBuf {
    if base_path.ends_with(service) {
        base_path.join("config")
    } else {
        base_path.join(service).join("config")
    }
}

pub fn load_settings<T: DeserializeOwned>(service: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let base_path = std::env::current_dir()?;
    let directory = configuration_directory(&base_path, service);
    let environment = std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "local".to_string());

    let settings = config::Config::builder()
        .add_source(config::File::from(directory.join("base.yaml")).required(true))
        .add_source(config::File::from(directory.join(format!("{}.yaml", environment))).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}
