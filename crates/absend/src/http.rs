use crate::service::{AbsenError, AttendanceService};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

type AppState = Arc<AttendanceService>;

pub fn router(service: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/enroll", post(enroll))
        .route("/liveness/start", post(liveness_start))
        .route("/liveness/verify", post(liveness_verify))
        .route("/absen", post(absen))
        .route("/attendance/:user_id", get(attendance))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

impl IntoResponse for AbsenError {
    fn into_response(self) -> Response {
        let status = match &self {
            AbsenError::InvalidRequest(_)
            | AbsenError::InvalidImage
            | AbsenError::NoFaceDetected
            | AbsenError::LivenessNotVerified => StatusCode::BAD_REQUEST,
            AbsenError::SessionNotFound | AbsenError::NoCandidate => StatusCode::NOT_FOUND,
            AbsenError::LowConfidence => StatusCode::UNAUTHORIZED,
            AbsenError::DuplicateIdentity(_) => StatusCode::CONFLICT,
            AbsenError::Storage(_) | AbsenError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Text field plus the `image` file part of an upload form.
struct Upload {
    text: String,
    image: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart, text_field: &str) -> Result<Upload, AbsenError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        AbsenError::InvalidRequest(format!("malformed form: {}", e.body_text()))
    };

    let mut text = None;
    let mut image = None;
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(n) if n == text_field => text = Some(field.text().await.map_err(malformed)?),
            Some("image") => image = Some(field.bytes().await.map_err(malformed)?.to_vec()),
            _ => {}
        }
    }

    match (text, image) {
        (Some(text), Some(image)) => Ok(Upload { text, image }),
        (None, _) => Err(AbsenError::InvalidRequest(format!("missing form field: {text_field}"))),
        (_, None) => Err(AbsenError::InvalidRequest("missing form field: image".into())),
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Face-Absen System Ready", "docs": "/docs" }))
}

async fn status(State(service): State<AppState>) -> Result<Json<Value>, AbsenError> {
    Ok(Json(json!(service.status().await?)))
}

async fn enroll(State(service): State<AppState>, multipart: Multipart) -> Result<Json<Value>, AbsenError> {
    let upload = read_upload(multipart, "user_id").await?;
    service.enroll(&upload.text, upload.image).await?;
    Ok(Json(json!({ "status": "enrolled", "user_id": upload.text })))
}

async fn liveness_start(State(service): State<AppState>) -> Result<Json<Value>, AbsenError> {
    Ok(Json(json!(service.start_liveness()?)))
}

async fn liveness_verify(State(service): State<AppState>, multipart: Multipart) -> Result<Json<Value>, AbsenError> {
    let upload = read_upload(multipart, "session_id").await?;
    let live = service.verify_liveness(upload.text.trim(), upload.image).await?;
    Ok(Json(json!({ "liveness": live })))
}

async fn absen(State(service): State<AppState>, multipart: Multipart) -> Result<Json<Value>, AbsenError> {
    let upload = read_upload(multipart, "session_id").await?;
    let receipt = service.submit_attendance(upload.text.trim(), upload.image).await?;
    Ok(Json(json!({
        "absen": true,
        "user_id": receipt.user_id,
        "confidence": receipt.confidence,
    })))
}

async fn attendance(State(service): State<AppState>, Path(user_id): Path<String>) -> Result<Json<Value>, AbsenError> {
    let records = service.attendance_for(&user_id).await?;
    Ok(Json(json!({ "user_id": user_id, "records": records })))
}
