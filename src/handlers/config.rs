use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

fn config_json(config: &AppConfig) -> Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "upload": {
            "max_file_size_mb": config.upload.max_file_size_mb,
            "max_path_length": config.upload.max_path_length,
            "allowed_extensions": config.upload.allowed_extensions
        },
        "pipeline": {
            "work_dir": config.pipeline.work_dir,
            "window_seconds": config.pipeline.window_seconds,
            "canonical_sample_rate": config.pipeline.canonical_sample_rate,
            "feature_set": config.pipeline.feature_set,
            "feature_level": config.pipeline.feature_level,
            "decode_failure_policy": config.pipeline.decode_failure_policy,
            "feature_table_dir": config.pipeline.feature_table_dir,
            "condition_name": config.pipeline.condition_name
        },
        "models": {
            "scaler_path": config.models.scaler_path,
            "classifier_path": config.models.classifier_path,
            "device": config.models.device
        },
        "performance": {
            "max_concurrent_runs": config.performance.max_concurrent_runs
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

/// Partially update the running configuration.
///
/// Runs already in flight keep the settings they started with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}
