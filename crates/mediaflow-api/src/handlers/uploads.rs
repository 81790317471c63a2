use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mediaflow_services::CreateUploadRequest;

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

/// Open a processing job and return a presigned upload URL.
#[tracing::instrument(
    skip(state, request),
    fields(
        owner_id = request.owner_id,
        media_kind = %request.media_kind,
        operation = "create_upload"
    )
)]
pub async fn create_upload(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let intent = state.issuer.create(request).await?;

    tracing::info!(
        processing_id = intent.processing_id,
        upload_key = %intent.upload_key,
        "Upload intent created"
    );

    Ok((StatusCode::CREATED, Json(intent)))
}

#[tracing::instrument(skip(state), fields(operation = "get_upload_status"))]
pub async fn get_upload_status(
    State(state): State<AppState>,
    Path(processing_id): Path<i64>,
) -> Result<impl IntoResponse, HttpAppError> {
    let view = state.issuer.get_status(processing_id).await?;
    Ok(Json(view))
}
