//! Chunked upload endpoints.

use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use tracing::instrument;

use crate::error::ServerResult;
use crate::uploads;
use crate::State;
use depot::api::v1::uploads::{
    CancelUploadResponse, CompleteUploadRequest, CompleteUploadResponse, InitializeUploadRequest,
    InitializeUploadResponse, ResumeUploadResponse, UploadChunkRequest, UploadChunkResponse,
    UploadStatusResponse, VerifyChecksumResponse,
};
use depot::api::v1::ApiResponse;

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn initialize(
    Extension(state): Extension<State>,
    Json(request): Json<InitializeUploadRequest>,
) -> ServerResult<(StatusCode, Json<ApiResponse<InitializeUploadResponse>>)> {
    let upload = uploads::initialize(&state, request).await?;

    let response = InitializeUploadResponse {
        upload_id: upload.id.clone(),
        status: upload.status.to_string(),
        total_chunks: upload.total_chunks as u32,
        uploaded_chunks: upload.uploaded_chunks as u32,
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::of(response))))
}

#[instrument(skip_all, fields(upload_id = %request.upload_id))]
#[axum_macros::debug_handler]
pub(crate) async fn chunk(
    Extension(state): Extension<State>,
    Json(request): Json<UploadChunkRequest>,
) -> ServerResult<Json<ApiResponse<UploadChunkResponse>>> {
    let receipt = uploads::receive_chunk(&state, request).await?;
    Ok(Json(ApiResponse::of(receipt)))
}

#[instrument(skip_all, fields(upload_id = %upload_id))]
#[axum_macros::debug_handler]
pub(crate) async fn complete(
    Extension(state): Extension<State>,
    Path(upload_id): Path<String>,
    request: Option<Json<CompleteUploadRequest>>,
) -> ServerResult<Json<ApiResponse<CompleteUploadResponse>>> {
    let generate_variants = request.map(|Json(r)| r.generate_variants).unwrap_or(true);

    let (upload, images) = uploads::complete(&state, &upload_id, generate_variants).await?;

    let response = CompleteUploadResponse {
        upload_id: upload.id.clone(),
        status: upload.status.to_string(),
        completed_at: upload.completed_at,
        images: images.iter().map(uploads::image_info).collect(),
    };

    Ok(Json(ApiResponse::of(response)))
}

#[instrument(skip_all, fields(upload_id = %upload_id))]
#[axum_macros::debug_handler]
pub(crate) async fn status(
    Extension(state): Extension<State>,
    Path(upload_id): Path<String>,
) -> ServerResult<Json<ApiResponse<UploadStatusResponse>>> {
    let status = uploads::status(&state, &upload_id).await?;
    Ok(Json(ApiResponse::of(status)))
}

#[instrument(skip_all, fields(upload_id = %upload_id))]
#[axum_macros::debug_handler]
pub(crate) async fn resume(
    Extension(state): Extension<State>,
    Path(upload_id): Path<String>,
) -> ServerResult<Json<ApiResponse<ResumeUploadResponse>>> {
    let resume = uploads::resume(&state, &upload_id).await?;
    Ok(Json(ApiResponse::of(resume)))
}

#[instrument(skip_all, fields(upload_id = %upload_id))]
#[axum_macros::debug_handler]
pub(crate) async fn verify(
    Extension(state): Extension<State>,
    Path(upload_id): Path<String>,
) -> ServerResult<Json<ApiResponse<VerifyChecksumResponse>>> {
    let checksum_valid = uploads::verify_checksum(&state, &upload_id).await?;

    Ok(Json(ApiResponse::of(VerifyChecksumResponse {
        upload_id,
        checksum_valid,
    })))
}

#[instrument(skip_all, fields(upload_id = %upload_id))]
#[axum_macros::debug_handler]
pub(crate) async fn cancel(
    Extension(state): Extension<State>,
    Path(upload_id): Path<String>,
) -> ServerResult<Json<ApiResponse<CancelUploadResponse>>> {
    let cancelled = uploads::cancel(&state, &upload_id).await?;

    Ok(Json(ApiResponse::of(CancelUploadResponse {
        upload_id,
        cancelled,
    })))
}
