//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Every field carries a serde default, so an empty file (or no
//! file at all) yields a working configuration.

pub mod backpressure;
pub mod logging;
pub mod retry;
pub mod scheduling;
pub mod worker;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::backpressure::BackpressureConfig;
pub use self::logging::LoggingConfig;
pub use self::retry::RetryConfig;
pub use self::scheduling::SchedulingConfig;
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// Worker pool and queue controller settings.
    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig,
    /// Retry backoff settings.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
    /// Admission backpressure settings.
    #[serde(default)]
    #[validate(nested)]
    pub backpressure: BackpressureConfig,
    /// Posting time optimizer settings.
    #[serde(default)]
    #[validate(nested)]
    pub scheduling: SchedulingConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `AUTOPOST__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("AUTOPOST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        loaded.check()?;
        Ok(loaded)
    }

    /// Validate field ranges and cross-field constraints.
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()
            .map_err(|e| AppError::configuration(format!("Invalid configuration: {e}")))?;

        if self.backpressure.low_watermark > self.backpressure.high_watermark {
            return Err(AppError::configuration(format!(
                "backpressure.low_watermark ({}) must not exceed high_watermark ({})",
                self.backpressure.low_watermark, self.backpressure.high_watermark
            )));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(AppError::configuration(format!(
                "retry.base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        Ok(())
    }
}
