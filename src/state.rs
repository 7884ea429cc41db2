//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers (and blocking pipeline runs) hold a reference at once
//! - **RwLock**: many readers or one writer; config reads vastly outnumber updates
//! - **T**: the protected data
//!
//! ### Arc<T> without a lock
//! The model artifacts and the feature extractor are loaded once and never change, so
//! they are shared as plain `Arc`s. Every run reads them concurrently without locking.
//!
//! ### RAII guards
//! `ActiveRunGuard` decrements the active-run counter when dropped, so a run that
//! panics or is cancelled still releases its slot.
//!
//! ### Poisoned locks
//! A panic while holding a lock "poisons" it. Metrics and config stay usable after
//! such a panic, so poisoned guards are recovered with `PoisonError::into_inner`
//! instead of propagating the panic to every later request.

use crate::classifier::ModelArtifacts;
use crate::config::AppConfig;
use crate::features::FeatureExtractor;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: cloning copies the `Arc` pointers, not the data
/// - **Arc<dyn FeatureExtractor>**: a trait object, so tests can swap extractors
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and run counters (updated by middleware and the upload handler)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Fitted scaler and classifier, read-only after startup
    pub models: Arc<ModelArtifacts>,

    /// Feature extractor shared by every run
    pub extractor: Arc<dyn FeatureExtractor>,

    /// When the server started
    pub start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("models", &self.models.info())
            .field("extractor", self.extractor.config())
            .field("start_time", &self.start_time)
            .finish()
    }
}

/// Counters collected across all requests and runs.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability of the HTTP layer
/// - **active_runs**: current analysis load, bounded by `max_concurrent_runs`
/// - **completed_runs / failed_runs / rejected_runs**: pipeline outcomes
/// - **endpoint_metrics**: per-route timing
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_runs: u32,
    pub completed_runs: u64,
    pub failed_runs: u64,
    /// Uploads turned away because the server was at capacity
    pub rejected_runs: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Timing and error counts for one route.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Holds one slot of the concurrent-run budget; releases it on drop.
#[derive(Debug)]
pub struct ActiveRunGuard {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_runs = metrics.active_runs.saturating_sub(1);
    }
}

impl AppState {
    pub fn new(config: AppConfig, models: Arc<ModelArtifacts>, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            models,
            extractor,
            start_time: Instant::now(),
        }
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately; a run keeps its own snapshot even if
    /// the configuration is updated while it is in flight.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record timing for one request to `endpoint` (e.g. "POST /upload_file").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Claim a run slot, or `None` when `max_concurrent_runs` are already active.
    pub fn try_begin_run(&self) -> Option<ActiveRunGuard> {
        let limit = self.get_config().performance.max_concurrent_runs;
        let mut metrics = self.metrics_write();
        if metrics.active_runs as usize >= limit {
            metrics.rejected_runs += 1;
            return None;
        }
        metrics.active_runs += 1;
        Some(ActiveRunGuard { metrics: Arc::clone(&self.metrics) })
    }

    pub fn record_run_outcome(&self, success: bool) {
        let mut metrics = self.metrics_write();
        if success {
            metrics.completed_runs += 1;
        } else {
            metrics.failed_runs += 1;
        }
    }

    /// Consistent copy of the metrics for serialisation.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::classifier::{ClassifierArtifact, ScalerArtifact};
    use crate::features::FunctionalsExtractor;
    use candle_core::Device;

    /// State with an identity scaler and a zero-weight classifier over the built-in schema.
    pub fn test_state(config: AppConfig) -> AppState {
        let names = FunctionalsExtractor::feature_names();
        let n = names.len();
        let scaler = ScalerArtifact { feature_names: names, mean: vec![0.0; n], scale: vec![1.0; n] };
        let classifier = ClassifierArtifact {
            model_type: "logistic_regression".to_string(),
            feature_names: None,
            coefficients: vec![0.0; n],
            intercept: 0.0,
        };
        let models = ModelArtifacts::from_parts(scaler, classifier, &Device::Cpu).unwrap();
        let extractor = FunctionalsExtractor::new(config.pipeline.canonical_sample_rate);
        AppState::new(config, Arc::new(models), Arc::new(extractor))
    }
}
