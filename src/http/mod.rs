//! The REST API of the service: one route per repository operation.

mod auth;

pub use self::auth::{UserContext, WorkPackageAccessToken};

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::crypto::{VerifyingKey, WORK_ORDER_TOKEN_VALID_SECONDS};
use crate::models::{
    BoxWithExpiration, DatasetWithExpiration, UploadWorkOrderTokenRequest, ValidationError,
    WorkPackageCreationData, WorkPackageCreationResponse, WorkPackageDetails,
};
use crate::repository::{RepositoryError, WorkPackageRepository};

/// Shared state of all request handlers.
#[derive(Clone)]
pub struct AppState {
    repository: Arc<WorkPackageRepository>,
    auth_key: VerifyingKey,
}

impl AppState {
    pub fn new(repository: Arc<WorkPackageRepository>, auth_key: VerifyingKey) -> Self {
        AppState {
            repository,
            auth_key,
        }
    }
}

/// An error response with a `detail` body, FastAPI style.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn unprocessable(detail: String) -> Self {
        ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail,
        }
    }

    fn forbidden(detail: &str) -> Self {
        ApiError {
            status: StatusCode::FORBIDDEN,
            detail: detail.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        ApiError::unprocessable(error.0)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Access(detail) => ApiError {
                status: StatusCode::FORBIDDEN,
                detail,
            },
            error => {
                error!(%error, "request failed");
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    detail: "Internal server error".to_string(),
                }
            }
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/work-packages", post(create_work_package))
        .route("/work-packages/{work_package_id}", get(get_work_package))
        .route(
            "/work-packages/{work_package_id}/files/{accession}/work-order-tokens",
            post(create_download_work_order_token),
        )
        .route(
            "/work-packages/{work_package_id}/boxes/{box_id}/work-order-tokens",
            post(create_upload_work_order_token),
        )
        .route("/users/{user_id}/datasets", get(get_datasets))
        .route("/users/{user_id}/boxes", get(get_upload_boxes))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "OK"}))
}

async fn create_work_package(
    State(state): State<AppState>,
    user: UserContext,
    Json(creation_data): Json<WorkPackageCreationData>,
) -> Result<(StatusCode, Json<WorkPackageCreationResponse>), ApiError> {
    let creation_data = creation_data.validated()?;
    let response = state.repository.create(creation_data, &user.0).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_work_package(
    State(state): State<AppState>,
    Path(work_package_id): Path<Uuid>,
    token: WorkPackageAccessToken,
) -> Result<Json<WorkPackageDetails>, ApiError> {
    let work_package = state
        .repository
        .get(work_package_id, true, Some(&token.0))
        .await?;
    Ok(Json(work_package.details()))
}

fn cache_control() -> (header::HeaderName, String) {
    (
        header::CACHE_CONTROL,
        format!("max-age={WORK_ORDER_TOKEN_VALID_SECONDS}, private"),
    )
}

async fn create_download_work_order_token(
    State(state): State<AppState>,
    Path((work_package_id, accession)): Path<(Uuid, String)>,
    token: WorkPackageAccessToken,
) -> Result<Response, ApiError> {
    let wot = state
        .repository
        .get_download_wot(work_package_id, &accession, &token.0)
        .await?;
    Ok((StatusCode::CREATED, [cache_control()], Json(wot)).into_response())
}

async fn create_upload_work_order_token(
    State(state): State<AppState>,
    Path((work_package_id, box_id)): Path<(Uuid, Uuid)>,
    token: WorkPackageAccessToken,
    Json(request): Json<UploadWorkOrderTokenRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;
    let wot = state
        .repository
        .get_upload_wot(
            work_package_id,
            request.work_type,
            box_id,
            request.alias,
            request.file_id,
            &token.0,
        )
        .await?;
    Ok((StatusCode::CREATED, [cache_control()], Json(wot)).into_response())
}

async fn get_datasets(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: UserContext,
) -> Result<Json<Vec<DatasetWithExpiration>>, ApiError> {
    if user.0.id.parse::<Uuid>().map_or(true, |id| id != user_id) {
        return Err(ApiError::forbidden("Not authorized to get datasets"));
    }
    Ok(Json(state.repository.get_datasets(user_id).await?))
}

async fn get_upload_boxes(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: UserContext,
) -> Result<Json<Vec<BoxWithExpiration>>, ApiError> {
    if user.0.id.parse::<Uuid>().map_or(true, |id| id != user_id) {
        return Err(ApiError::forbidden("Not authorized to get upload boxes"));
    }
    Ok(Json(state.repository.get_upload_boxes(user_id).await?))
}
