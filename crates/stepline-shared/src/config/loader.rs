//! Layered configuration loading.
//!
//! Precedence, lowest to highest: struct defaults, the base TOML file named
//! by `STEPLINE_CONFIG_PATH`, an environment overlay file derived from
//! `STEPLINE_ENV` (`<base stem>.<env>.toml` next to the base file), and
//! `STEPLINE__`-prefixed environment variables
//! (e.g. `STEPLINE__EXECUTION__MAX_CONCURRENT_STEPS_LIMIT=6`).

use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};

pub const CONFIG_PATH_VAR: &str = "STEPLINE_CONFIG_PATH";
pub const ENVIRONMENT_VAR: &str = "STEPLINE_ENV";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from the process environment.
    pub fn load() -> EngineResult<EngineConfig> {
        let base_path = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        let environment = std::env::var(ENVIRONMENT_VAR).ok();
        Self::load_from(base_path.as_deref(), environment.as_deref())
    }

    /// Load configuration from explicit inputs. Missing files are tolerated;
    /// defaults fill every field the layers leave unset.
    pub fn load_from(
        base_path: Option<&Path>,
        environment: Option<&str>,
    ) -> EngineResult<EngineConfig> {
        let mut builder = config::Config::builder();

        if let Some(base) = base_path {
            builder = builder.add_source(config::File::from(base).required(false));
            if let Some(env_name) = environment {
                if let Some(overlay) = Self::overlay_path(base, env_name) {
                    builder = builder.add_source(config::File::from(overlay.as_path()).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("STEPLINE")
                .prefix_separator("__")
                .separator("__"),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<EngineConfig>())
            .map_err(|e| EngineError::Configuration(e.to_string()))
    }

    /// `stepline.toml` + `production` -> `stepline.production.toml`.
    fn overlay_path(base: &Path, environment: &str) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let mut overlay = base.to_path_buf();
        overlay.set_file_name(format!("{stem}.{environment}.toml"));
        Some(overlay)
    }
}
