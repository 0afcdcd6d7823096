//! Media root listing, upload and deletion.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::media::MediaFile;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_media))
        .route("/{*reference}", put(upload_media).delete(delete_media))
}

async fn list_media(State(state): State<AppState>) -> ApiResult<Json<Vec<MediaFile>>> {
    Ok(Json(state.media.list().await?))
}

/// Store the raw request body as `reference`.
async fn upload_media(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    body: Body,
) -> ApiResult<(StatusCode, Json<MediaFile>)> {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let stored = state.media.store(&reference, StreamReader::new(stream)).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn delete_media(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<StatusCode> {
    state.media.remove(&reference).await?;
    Ok(StatusCode::NO_CONTENT)
}
