//! # Model Status Handler
//!
//! The scaler and classifier are loaded once at startup and cannot be swapped at
//! runtime, so the only model endpoint reports what is loaded.
//!
//! ## Endpoint: `GET /api/v1/models/status`
//!
//! ```json
//! {
//!   "timestamp": "2025-01-01T12:00:00Z",
//!   "loaded": true,
//!   "model": {
//!     "model_type": "logistic_regression",
//!     "feature_count": 31,
//!     "device": "CPU",
//!     "scaler_path": "models/scaler.json",
//!     "classifier_path": "models/classifier.json",
//!     "loaded_at": "2025-01-01T11:59:58Z"
//!   },
//!   "extractor": {
//!     "feature_set": "compact-functionals-v1",
//!     "level": "functionals",
//!     "sample_rate": 16000,
//!     "features": 31
//!   }
//! }
//! ```

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn model_status(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let extractor = state.extractor.config();
    let schema = state.extractor.feature_schema();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "loaded": true,
        "model": state.models.info(),
        "extractor": {
            "feature_set": extractor.feature_set,
            "level": extractor.level,
            "sample_rate": extractor.sample_rate,
            "features": schema.len()
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_model_status() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(AppConfig::default())))
                .route("/models/status", web::get().to(model_status)),
        )
        .await;

        let request = test::TestRequest::get().uri("/models/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["model"]["model_type"], "logistic_regression");
        assert_eq!(body["model"]["feature_count"], 31);
        assert_eq!(body["model"]["device"], "CPU");
        assert_eq!(body["extractor"]["features"], 31);
        assert_eq!(body["extractor"]["sample_rate"], 16000);
    }
}
