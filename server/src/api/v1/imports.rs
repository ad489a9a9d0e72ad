//! CSV import endpoints.

use axum::extract::{Extension, Json, Multipart, Path, Query};
use axum::http::StatusCode;
use bytes::Bytes;
use serde::Deserialize;
use tracing::instrument;

use crate::error::{ServerError, ServerResult};
use crate::imports::{self, ProductRowHandler, RowHandler};
use crate::State;
use depot::api::v1::imports::{
    ColumnsResponse, ImportDetailResponse, ImportHistoryResponse, ImportOptions, ImportResult,
    StatisticsResponse, ValidateResponse,
};
use depot::api::v1::ApiResponse;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    page: Option<u64>,
    per_page: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatisticsQuery {
    days: Option<i64>,
}

/// One uploaded CSV plus its parsed options.
struct ImportUpload {
    filename: String,
    data: Bytes,
    options: ImportOptions,
}

async fn read_multipart(mut multipart: Multipart) -> ServerResult<ImportUpload> {
    let mut filename = None;
    let mut data = None;
    let mut options = ImportOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ServerError::request_error)?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                data = Some(field.bytes().await.map_err(ServerError::request_error)?);
            }
            Some("options") => {
                let text = field.text().await.map_err(ServerError::request_error)?;
                options = serde_json::from_str(&text)
                    .map_err(|e| ServerError::validation(format!("Invalid options: {e}")))?;
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ServerError::validation("Missing \"file\" field"))?;

    Ok(ImportUpload {
        filename: filename.unwrap_or_else(|| "upload.csv".to_string()),
        data,
        options,
    })
}

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn import_products(
    Extension(state): Extension<State>,
    multipart: Multipart,
) -> ServerResult<Json<ApiResponse<ImportResult>>> {
    let upload = read_multipart(multipart).await?;

    let result = imports::import(
        &state,
        &ProductRowHandler,
        &upload.filename,
        &upload.data,
        upload.options,
    )
    .await?;

    Ok(Json(ApiResponse::of(result)))
}

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn validate_products(
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<ApiResponse<ValidateResponse>>)> {
    let upload = read_multipart(multipart).await?;

    let missing = imports::validate_header(&ProductRowHandler, &upload.data)?;

    let valid = missing.is_empty();
    let response = ApiResponse {
        success: valid,
        message: None,
        data: Some(ValidateResponse {
            valid,
            missing_columns: if valid { None } else { Some(missing) },
        }),
    };

    let status = if valid {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    Ok((status, Json(response)))
}

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn product_columns() -> Json<ApiResponse<ColumnsResponse>> {
    let handler = ProductRowHandler;

    Json(ApiResponse::of(ColumnsResponse {
        import_type: handler.import_type().to_string(),
        required_columns: handler
            .required_columns()
            .iter()
            .map(|c| c.to_string())
            .collect(),
        optional_columns: handler
            .optional_columns()
            .iter()
            .map(|c| c.to_string())
            .collect(),
    }))
}

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn history(
    Extension(state): Extension<State>,
    Query(query): Query<HistoryQuery>,
) -> ServerResult<Json<ApiResponse<ImportHistoryResponse>>> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(20);

    let history = imports::history(&state, page, per_page).await?;
    Ok(Json(ApiResponse::of(history)))
}

#[instrument(skip_all, fields(import_id))]
#[axum_macros::debug_handler]
pub(crate) async fn detail(
    Extension(state): Extension<State>,
    Path(import_id): Path<i64>,
) -> ServerResult<Json<ApiResponse<ImportDetailResponse>>> {
    let detail = imports::detail(&state, import_id).await?;
    Ok(Json(ApiResponse::of(detail)))
}

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn statistics(
    Extension(state): Extension<State>,
    Query(query): Query<StatisticsQuery>,
) -> ServerResult<Json<ApiResponse<StatisticsResponse>>> {
    let days = query.days.unwrap_or(30);

    let statistics = imports::statistics(&state, days).await?;
    Ok(Json(ApiResponse::of(statistics)))
}
