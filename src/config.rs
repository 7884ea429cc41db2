//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_PIPELINE__WINDOW_SECONDS`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore because several field names already contain one
//! (`window_seconds`, `max_file_size_mb`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - **server**: where the HTTP listener binds
/// - **upload**: request validation limits applied before a run starts
/// - **pipeline**: segmentation, resampling and feature settings for each run
/// - **models**: paths of the fitted scaler and classifier artifacts
/// - **performance**: concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub pipeline: PipelineConfig,
    pub models: ModelsConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Limits enforced on an upload before it is handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted upload in MiB
    pub max_file_size_mb: u64,

    /// Longest accepted path for the stored upload (characters)
    pub max_path_length: usize,

    /// Lower-case extensions accepted without the dot
    pub allowed_extensions: Vec<String>,
}

/// What to do when one segment's audio buffer cannot be decoded.
///
/// ## Variants:
/// - **Abort**: fail the whole run (one corrupt segment usually means the recording is damaged)
/// - **Skip**: log the segment and keep classifying the rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    Abort,
    Skip,
}

impl std::str::FromStr for DecodeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(DecodeFailurePolicy::Abort),
            "skip" => Ok(DecodeFailurePolicy::Skip),
            _ => Err(format!("Unknown decode failure policy: {}", s)),
        }
    }
}

/// Settings that shape one analysis run.
///
/// ## Fields:
/// - `work_dir`: parent directory of the per-run working directories
/// - `window_seconds`: nominal segment length
/// - `canonical_sample_rate`: every segment is resampled to this rate before extraction
/// - `feature_set` / `feature_level`: identify the extractor configuration; the extractor
///   built at startup must agree with these or runs fail with a schema mismatch
/// - `decode_failure_policy`: abort or skip on a corrupt segment
/// - `feature_table_dir`: when set, each run's feature table is kept there as `<run_id>.csv`
/// - `condition_name`: label used in the human-readable result strings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub work_dir: String,
    pub window_seconds: f64,
    pub canonical_sample_rate: u32,
    pub feature_set: String,
    pub feature_level: String,
    pub decode_failure_policy: DecodeFailurePolicy,
    pub feature_table_dir: Option<String>,
    pub condition_name: String,
}

/// Fitted model artifacts loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub scaler_path: String,
    pub classifier_path: String,

    /// Inference device preference ("auto", "cpu", "cuda", "metal")
    pub device: String,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Uploads beyond this many in-flight runs are turned away
    pub max_concurrent_runs: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            upload: UploadConfig {
                max_file_size_mb: 1000,
                max_path_length: 255,
                allowed_extensions: vec!["mp3".to_string(), "wav".to_string()],
            },
            pipeline: PipelineConfig {
                work_dir: "processed".to_string(),
                window_seconds: 60.0,
                canonical_sample_rate: 16000,
                feature_set: crate::features::COMPACT_FUNCTIONALS_V1.to_string(),
                feature_level: crate::features::FUNCTIONALS_LEVEL.to_string(),
                decode_failure_policy: DecodeFailurePolicy::Abort,
                feature_table_dir: None,
                condition_name: "ADHD".to_string(),
            },
            models: ModelsConfig {
                scaler_path: "models/scaler.json".to_string(),
                classifier_path: "models/classifier.json".to_string(),
                device: "cpu".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_runs: 4,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_PIPELINE__WINDOW_SECONDS=30`: Shorter segments
    /// - `APP_MODELS__SCALER_PATH=/srv/models/scaler.json`: Artifact location
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching these at startup (and on runtime updates) keeps a bad value from
    /// surfacing later as a confusing per-run failure.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Maximum upload size must be greater than 0"));
        }

        if self.upload.max_path_length == 0 {
            return Err(anyhow::anyhow!("Maximum path length must be greater than 0"));
        }

        if self.upload.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one upload extension must be allowed"));
        }

        if !self.pipeline.window_seconds.is_finite() || self.pipeline.window_seconds <= 0.0 {
            return Err(anyhow::anyhow!("Window length must be greater than 0"));
        }

        if self.pipeline.canonical_sample_rate == 0 {
            return Err(anyhow::anyhow!("Canonical sample rate must be greater than 0"));
        }

        if self.performance.max_concurrent_runs == 0 {
            return Err(anyhow::anyhow!("Max concurrent runs must be greater than 0"));
        }

        Ok(())
    }

    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.upload.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the fields present in the JSON are changed, so `{"pipeline": {"window_seconds": 30}}`
    /// touches nothing else. Model paths, the canonical sample rate and the feature set are
    /// not updatable here: the artifacts and the extractor are built once at startup.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Port {} is out of range", port))?;
            }
        }

        if let Some(upload) = partial_config.get("upload") {
            if let Some(size) = upload.get("max_file_size_mb").and_then(|v| v.as_u64()) {
                self.upload.max_file_size_mb = size;
            }
            if let Some(length) = upload.get("max_path_length").and_then(|v| v.as_u64()) {
                self.upload.max_path_length = length as usize;
            }
        }

        if let Some(pipeline) = partial_config.get("pipeline") {
            if let Some(window) = pipeline.get("window_seconds").and_then(|v| v.as_f64()) {
                self.pipeline.window_seconds = window;
            }
            if let Some(policy) = pipeline.get("decode_failure_policy").and_then(|v| v.as_str()) {
                self.pipeline.decode_failure_policy =
                    policy.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
            if let Some(name) = pipeline.get("condition_name").and_then(|v| v.as_str()) {
                self.pipeline.condition_name = name.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(runs) = performance.get("max_concurrent_runs").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_runs = runs as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.window_seconds, 60.0);
        assert_eq!(config.pipeline.canonical_sample_rate, 16000);
        assert_eq!(config.pipeline.decode_failure_policy, DecodeFailurePolicy::Abort);
        assert_eq!(config.max_upload_bytes(), 1000 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.window_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.window_seconds = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"pipeline": {"window_seconds": 30, "decode_failure_policy": "skip"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.pipeline.window_seconds, 30.0);
        assert_eq!(config.pipeline.decode_failure_policy, DecodeFailurePolicy::Skip);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"pipeline": {"window_seconds": -5}}"#).is_err());

        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"pipeline": {"decode_failure_policy": "retry"}}"#).is_err());

        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
    }
}
