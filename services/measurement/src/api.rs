use crate::config::{ApiConfig, Config};
use crate::error::ServiceError;
use crate::pipeline::{MeasurementService, ReconciliationReport, SubmissionFields, Upload, UpdateFields};
use crate::record_store::Measurement;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Multipart field carrying the image
const IMAGE_FIELD: &str = "image";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MeasurementService>,
}

/// Owner selector accepted by the owner-scoped routes
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    #[serde(alias = "ownerId")]
    pub user_id: Option<String>,
}

impl OwnerQuery {
    fn owner_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }
}

/// Acknowledgement body
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            id: None,
            deleted: None,
        }
    }
}

/// Record list body
#[derive(Debug, Serialize, Deserialize)]
pub struct MeasurementsResponse {
    pub measurements: Vec<Measurement>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Failure of a request, mapped onto a status code
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    MalformedForm(MultipartError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::MalformedForm(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            ApiError::MalformedForm(e) => {
                warn!(error = %e, "Rejected malformed multipart body");
                (e.status(), e.body_text(), "MALFORMED_FORM")
            }
            ApiError::Service(e) => {
                let status = match e {
                    ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
                    ServiceError::NotFound { .. } | ServiceError::RecordNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    ServiceError::Io(_) | ServiceError::Database(_) | ServiceError::Store(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };

                let message = if e.is_client_error() {
                    e.to_string()
                } else {
                    error!(error = %e, "Request failed");
                    "Internal Server Error".to_string()
                };

                (status, message, e.code())
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, max_upload_bytes: usize) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/newMeasurement", post(create_measurement))
        .route("/api/getMeasurements", get(list_measurements))
        .route("/api/measurementByUserId", get(list_by_owner))
        .route("/api/deleteMeasurementByUserId", delete(delete_by_owner))
        .route("/api/updateMeasurementByUserId", put(update_by_owner))
        .route("/api/measurements/:id", get(get_measurement))
        .route("/api/measurements/:id/verify", get(verify_measurement))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "measurement-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept a new measurement: text fields plus one image part
#[instrument(skip_all)]
async fn create_measurement(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let mut form = read_form(multipart).await?;

    let fields = SubmissionFields {
        product_name: form.text.remove("productName"),
        description: form.text.remove("description"),
        owner_id: form
            .text
            .remove("user_id")
            .or_else(|| form.text.remove("ownerId")),
    };

    let created = state.service.ingest(fields, form.image).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: Some(created.id),
            ..MessageResponse::new("Measurement added successfully")
        }),
    ))
}

/// List every measurement
async fn list_measurements(
    State(state): State<AppState>,
) -> Result<Json<MeasurementsResponse>, ApiError> {
    let measurements = state.service.list_all().await?;
    Ok(Json(MeasurementsResponse { measurements }))
}

/// List the measurements of one owner
#[instrument(skip(state))]
async fn list_by_owner(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
) -> Result<Json<MeasurementsResponse>, ApiError> {
    let measurements = state.service.list_by_owner(params.owner_id()).await?;
    Ok(Json(MeasurementsResponse { measurements }))
}

/// Delete every measurement of one owner
#[instrument(skip(state))]
async fn delete_by_owner(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let deleted = state.service.delete_by_owner(params.owner_id()).await?;

    Ok(Json(MessageResponse {
        deleted: Some(deleted),
        ..MessageResponse::new("Measurements deleted successfully")
    }))
}

/// Update the first measurement of one owner
#[instrument(skip(state, multipart))]
async fn update_by_owner(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
    multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut form = read_form(multipart).await?;

    let fields = UpdateFields {
        product_name: form.text.remove("productName"),
        description: form.text.remove("description"),
    };

    state
        .service
        .update_by_owner(params.owner_id(), fields, form.image)
        .await?;

    Ok(Json(MessageResponse::new("Measurement updated successfully")))
}

/// Get single measurement
async fn get_measurement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Measurement>, ApiError> {
    Ok(Json(state.service.get(id).await?))
}

/// Compare a measurement's file with its inline copy
async fn verify_measurement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconciliationReport>, ApiError> {
    Ok(Json(state.service.verify(id).await?))
}

/// Text parts by name plus the image part, if any
struct SubmittedForm {
    text: HashMap<String, String>,
    image: Option<Upload>,
}

/// Drain a multipart body. Only the first image part is kept.
///
/// An image part without a filename is what a browser sends for an empty
/// file input, so it counts as no image at all.
async fn read_form(mut multipart: Multipart) -> Result<SubmittedForm, ApiError> {
    let mut form = SubmittedForm {
        text: HashMap::new(),
        image: None,
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == IMAGE_FIELD {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            if filename.is_empty() {
                debug!("Skipping image part without a filename");
                continue;
            }
            if form.image.is_none() {
                form.image = Some(Upload {
                    filename,
                    data: data.to_vec(),
                });
            }
        } else {
            let value = field.text().await?;
            form.text.entry(name).or_insert(value);
        }
    }

    Ok(form)
}

/// Start the measurement API server, serving until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, &config.api, config.media.max_upload_bytes);
    let addr = format!("{}:{}", config.api.host, config.api.port);

    info!(address = %addr, "Starting measurement API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
