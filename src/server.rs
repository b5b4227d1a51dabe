//! HTTP surface: `GET /health` and `POST /segment-image`, served at the root and under
//! the configured prefix.

use std::error::Error as StdError;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection, DefaultBodyLimit, Multipart,
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{MaskGenerator, MobileSamError, SegmentationParams, SegmentationPipeline};

/// Body of every failed response.
pub const PROCESSING_FAILED: &str = "Failed to process the uploaded image";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug)]
pub enum AppError {
    /// The request itself is unusable; the detail is returned as is.
    Unprocessable(String),
    /// The multipart stream failed; keeps the status axum assigns (413, 400).
    Rejected(StatusCode, String),
    /// Pipeline failure; logged in full, reported generically.
    Processing(MobileSamError),
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        Self::Rejected(err.status(), err.body_text())
    }
}

impl From<MobileSamError> for AppError {
    fn from(err: MobileSamError) -> Self {
        if err.is_client_error() {
            Self::Unprocessable(err.to_string())
        } else {
            Self::Processing(err)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::Unprocessable(detail) => {
                warn!("Rejected request: {}", detail);
                (StatusCode::UNPROCESSABLE_ENTITY, detail)
            }
            AppError::Rejected(status, detail) => {
                warn!("Rejected multipart body ({}): {}", status, detail);
                (status, detail)
            }
            AppError::Processing(err) => {
                error!(
                    "An error occurred while processing the uploaded image: {}",
                    error_chain(&err)
                );
                (StatusCode::INTERNAL_SERVER_ERROR, PROCESSING_FAILED.to_string())
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

type SharedPipeline<G> = Arc<SegmentationPipeline<G>>;

pub fn router<G: MaskGenerator + 'static>(
    pipeline: SharedPipeline<G>,
    root_path: &str,
    max_upload_bytes: usize,
) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/segment-image", post(segment_image::<G>));

    let app = if root_path.is_empty() {
        routes
    } else {
        routes.clone().nest(root_path, routes)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    app.layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "The API is up and running!".to_string(),
    })
}

async fn segment_image<G: MaskGenerator + 'static>(
    State(pipeline): State<SharedPipeline<G>>,
    query: Result<Query<SegmentationParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("segment_image", %request_id);

    async move {
        let Query(mut params) = query.map_err(|e| AppError::Unprocessable(e.body_text()))?;
        let mut multipart = multipart.map_err(|e| AppError::Unprocessable(e.body_text()))?;

        let mut file = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(AppError::from)?
        {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("file") => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(AppError::from)?;
                    file = Some(bytes.to_vec());
                }
                Some("params") => {
                    let text = field
                        .text()
                        .await
                        .map_err(AppError::from)?;
                    params = serde_json::from_str(&text).map_err(|e| {
                        AppError::Unprocessable(format!("Invalid segmentation params: {e}"))
                    })?;
                }
                _ => {}
            }
        }

        let file = file.ok_or_else(|| {
            AppError::Unprocessable("Missing required multipart field `file`".to_string())
        })?;
        debug!("Received {} bytes with {:?}", file.len(), params);

        let png = pipeline.process(file, params).await?;
        Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
    }
    .instrument(span)
    .await
}
