use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::observation::RawObservation;
use crate::predictor::{PredictionError, Predictor};

const INDEX_HTML: &str = include_str!("assets/index.html");
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Debug)]
pub struct ApiState {
    pub predictor: Predictor,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    model: &'static str,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .with_state(state)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(addr: &str, state: ApiState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested, draining connections");
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<ApiState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        model: state.predictor.technique(),
    })
}

/// Form bodies are decoded as form fields; anything else is treated as JSON,
/// whatever its declared content type.
async fn predict(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let decoded = if is_form(&headers) {
        RawObservation::from_form_slice(&body)
    } else {
        RawObservation::from_json_slice(&body)
    };

    let outcome = decoded
        .map_err(PredictionError::from)
        .and_then(|raw| state.predictor.handle_prediction(&raw));

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => error_response(&error),
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE))
}

fn error_response(error: &PredictionError) -> Response {
    let status = match error {
        PredictionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PredictionError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::debug!("Rejected prediction request ({}): {error}", error.kind());
    (
        status,
        Json(ErrorBody {
            error: error.public_message(),
        }),
    )
        .into_response()
}
