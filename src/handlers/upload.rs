//! # Upload Handler
//!
//! `POST /upload_file` accepts a multipart form with a `file` field and answers with a
//! server-sent-events stream of progress checkpoints followed by one result.
//!
//! ## Request validation (in order, each rejection is a single `result` event):
//! 1. no `file` field → `No file part`
//! 2. empty filename → `No selected file`
//! 3. extension not allowed → `Invalid file type. Only MP3 and WAV files are allowed.`
//! 4. stored path too long → `File path too long`
//! 5. body over the limit → `File too large. Maximum size is {N}MB`
//! 6. too many runs in flight → `Server busy. Please try again later.`
//!
//! ## Key Rust Concepts:
//! - **spawn_blocking**: the pipeline is CPU bound and synchronous, so it runs on tokio's
//!   blocking pool instead of stalling an actix worker
//! - **UnboundedReceiverStream**: adapts the run's mpsc receiver into a `Stream` that actix
//!   can send as a chunked body
//! - **DropGuard**: owned by the stream; when the client disconnects actix drops the body,
//!   the guard cancels the token and the run stops at its next checkpoint

use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::pipeline::orchestrator::INVALID_FILE_TYPE;
use crate::pipeline::{
    PipelineOrchestrator, PipelineSettings, PredictionResult, ProgressEvent, ProgressSender, RunWorkspace,
};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::http::header::CACHE_CONTROL;
use actix_web::{web, HttpResponse, HttpResponseBuilder};
use futures_util::{StreamExt, TryStreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// An upload that passed validation and now lives inside its run workspace.
struct StoredUpload {
    workspace: RunWorkspace,
    path: PathBuf,
}

/// Stream the upload to disk and run the analysis, reporting progress as SSE.
pub async fn upload_file(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let config = state.get_config();
    let condition = config.pipeline.condition_name.clone();

    let upload = match receive_upload(&config, payload).await {
        Ok(upload) => upload,
        Err(message) => {
            info!(reason = %message, "Upload rejected");
            return single_result(PredictionResult::failure(message), &condition);
        }
    };

    let Some(slot) = state.try_begin_run() else {
        warn!("Upload rejected, too many runs in flight");
        return single_result(
            PredictionResult::failure("Server busy. Please try again later."),
            &condition,
        );
    };

    let classifier: Arc<dyn Classifier> = state.models.clone();
    let orchestrator = match PipelineOrchestrator::new(
        PipelineSettings::from(&config),
        Arc::clone(&state.extractor),
        classifier,
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            warn!(error = %e, "Pipeline could not be assembled");
            state.record_run_outcome(false);
            return single_result(PredictionResult::from_error(&e), &condition);
        }
    };

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_state = state.get_ref().clone();

    info!(run_id = %upload.workspace.run_id(), path = %upload.path.display(), "Starting analysis");
    tokio::task::spawn_blocking(move || {
        let StoredUpload { workspace, path } = upload;
        // The stream closes when the last sender drops, so bookkeeping finishes first.
        let sender = ProgressSender::new(tx);
        let result = orchestrator.run(workspace, &path, sender.clone(), &run_cancel);
        run_state.record_run_outcome(result.success());
        drop(slot);
        drop(sender);
    });

    let guard = cancel.drop_guard();
    let frames = UnboundedReceiverStream::new(rx).map(move |event| {
        let _keep = &guard;
        Ok::<_, actix_web::Error>(web::Bytes::from(event.to_sse_frame(&condition)))
    });

    sse_response().streaming(frames)
}

fn sse_response() -> HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .content_type("text/event-stream")
        .insert_header((CACHE_CONTROL, "no-cache"));
    builder
}

/// A complete SSE body carrying only a result event.
fn single_result(result: PredictionResult, condition: &str) -> HttpResponse {
    sse_response().body(ProgressEvent::Result(result).to_sse_frame(condition))
}

/// Find the `file` field, validate it and stream it into a fresh run workspace.
///
/// The error is the message sent back to the client.
async fn receive_upload(config: &AppConfig, mut payload: Multipart) -> Result<StoredUpload, String> {
    while let Some(field) = payload.try_next().await.map_err(server_error)? {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let (Some(true), Some(filename)) = (field.name().map(|name| name == "file"), filename) else {
            drain(field).await?;
            continue;
        };

        return store_field(config, field, &filename).await;
    }

    Err("No file part".to_string())
}

async fn store_field(config: &AppConfig, mut field: Field, filename: &str) -> Result<StoredUpload, String> {
    if filename.is_empty() {
        return Err("No selected file".to_string());
    }

    let Some(extension) = allowed_extension(filename, &config.upload.allowed_extensions) else {
        return Err(INVALID_FILE_TYPE.to_string());
    };

    let mut safe_name = secure_filename(filename);
    if !safe_name.to_lowercase().ends_with(&format!(".{}", extension)) {
        safe_name = format!("upload.{}", extension);
    }

    let workspace = RunWorkspace::create(&PathBuf::from(&config.pipeline.work_dir)).map_err(server_error)?;
    let path = workspace.input_path(&safe_name);
    if path.to_string_lossy().chars().count() > config.upload.max_path_length {
        return Err("File path too long".to_string());
    }

    let limit = config.max_upload_bytes();
    let mut file = tokio::fs::File::create(&path).await.map_err(server_error)?;
    let mut written: u64 = 0;
    while let Some(chunk) = field.try_next().await.map_err(server_error)? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(format!("File too large. Maximum size is {}MB", config.upload.max_file_size_mb));
        }
        file.write_all(&chunk).await.map_err(server_error)?;
    }
    file.flush().await.map_err(server_error)?;

    info!(filename = %safe_name, bytes = written, "Stored upload");
    Ok(StoredUpload { workspace, path })
}

async fn drain(mut field: Field) -> Result<(), String> {
    while field.try_next().await.map_err(server_error)?.is_some() {}
    Ok(())
}

fn server_error(err: impl std::fmt::Display) -> String {
    format!("Server error: {}", err)
}

/// Lower-cased extension of `filename` if it is one of `allowed`.
pub fn allowed_extension(filename: &str, allowed: &[String]) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    let extension = extension.to_lowercase();
    allowed.iter().any(|a| *a == extension).then_some(extension)
}

/// Reduce a client-supplied filename to a safe, flat ASCII name.
///
/// Path separators become word breaks, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_.-]` is dropped and leading or trailing `.`/`_` are trimmed. The result can
/// be empty.
pub fn secure_filename(filename: &str) -> String {
    let flattened: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}
