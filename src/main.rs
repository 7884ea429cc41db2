//! # Vocal Screen Backend - Main Application Entry Point
//!
//! An actix-web server that takes an uploaded voice recording, runs it through a
//! segment → resample → feature extraction → classification pipeline and streams
//! progress and the final prediction back as server-sent events.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the HTTP layer is asynchronous; the CPU-bound pipeline runs on
//!   tokio's blocking pool so it never stalls a worker
//! - **modules**: code is organised by concern (audio, features, classifier, pipeline)
//! - **Result<T, E>**: `anyhow` at startup, typed `thiserror` errors inside the pipeline
//! - **Arc**: model artifacts and the extractor are loaded once and shared by every run
//!
//! ## Application Architecture:
//! - **config**: configuration (TOML file + environment variables)
//! - **state**: shared application state, metrics and the run-slot budget
//! - **audio**: decoding, segmenting, resampling and transient segment files
//! - **features**: per-segment feature extraction and the aggregated table
//! - **classifier**: standard scaler and logistic regression over candle tensors
//! - **pipeline**: the run state machine, progress events and orchestration
//! - **handlers / health / middleware**: the HTTP surface
//! - **error**: HTTP error responses and the pipeline error taxonomy

mod audio;
mod classifier;
mod config;
mod device;
mod error;
mod features;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use classifier::ModelArtifacts;
use config::AppConfig;
use features::FunctionalsExtractor;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup order:
/// 1. load `.env`, initialise tracing, load and validate configuration
/// 2. load the scaler and classifier artifacts (fatal if missing or inconsistent)
/// 3. build the feature extractor for the canonical sample rate
/// 4. create the work directory and start the HTTP server
/// 5. wait for the server to exit or for SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let models = ModelArtifacts::load(&config.models).with_context(|| {
        format!(
            "Failed to load model artifacts ({}, {})",
            config.models.scaler_path, config.models.classifier_path
        )
    })?;
    let extractor = FunctionalsExtractor::new(config.pipeline.canonical_sample_rate);

    std::fs::create_dir_all(&config.pipeline.work_dir)
        .with_context(|| format!("Failed to create work directory {}", config.pipeline.work_dir))?;

    let app_state = AppState::new(config.clone(), Arc::new(models), Arc::new(extractor));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Multipart uploads are streamed to disk; the size limit is enforced by the handler.
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/upload_file", web::post().to(handlers::upload_file))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/models/status", web::get().to(handlers::model_status)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default `vocal_screen_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vocal_screen_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip `SHUTDOWN_SIGNAL` on SIGTERM or SIGINT.
///
/// If a handler cannot be installed the server still runs; it just cannot be stopped
/// gracefully through that signal.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
