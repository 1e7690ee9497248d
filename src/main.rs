use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

mod config;
mod detect;
mod models;
mod parse;

use config::AppConfig;
use detect::{DetectionError, Detector, MAX_IMAGE_BYTES};
use models::AnalyzeRequest;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let bind_addr = config.bind_addr;
    let detector = match Detector::new(config) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("failed to build detector: {}", e);
            std::process::exit(1);
        }
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/disease-detection-file", post(detection_file_endpoint))
        .route("/disease-detection", post(detection_endpoint))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024))
        .with_state(detector);

    let listener = tokio::net::TcpListener::bind(bind_addr).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

async fn index() -> impl IntoResponse {
    Html(include_str!("../static/index.html"))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn detection_file_endpoint(
    State(detector): State<Arc<Detector>>,
    mut multipart: Multipart,
) -> Response {
    let mut file_bytes: Option<Vec<u8>> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("file") {
                    match field.bytes().await {
                        Ok(bytes) => file_bytes = Some(bytes.to_vec()),
                        Err(e) => {
                            return error_response(
                                StatusCode::BAD_REQUEST,
                                format!("failed to read upload: {}", e),
                            );
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid multipart body: {}", e),
                );
            }
        }
    }

    let bytes = match file_bytes {
        Some(bytes) => bytes,
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "multipart field 'file' is required".to_string(),
            );
        }
    };

    match detector.analyze_bytes(&bytes, None, None).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => detection_error_response(e),
    }
}

async fn detection_endpoint(
    State(detector): State<Arc<Detector>>,
    Json(req): Json<AnalyzeRequest>,
) -> Response {
    match detector
        .analyze_base64(&req.image, req.temperature, req.max_tokens)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => detection_error_response(e),
    }
}

fn detection_error_response(e: DetectionError) -> Response {
    let status = match &e {
        DetectionError::EmptyImage
        | DetectionError::ImageTooLarge
        | DetectionError::InvalidImage(_)
        | DetectionError::InvalidBase64(_) => StatusCode::BAD_REQUEST,
        DetectionError::UnparseableReply(_) | DetectionError::EmptyReply => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DetectionError::Upstream { .. } | DetectionError::Request(_) => StatusCode::BAD_GATEWAY,
    };
    tracing::warn!("analysis failed: {}", e);
    error_response(status, e.to_string())
}

fn error_response(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({"detail": detail}))).into_response()
}
