use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Query, State, multipart::MultipartRejection},
    http::{Method, StatusCode},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    AppState,
    config::non_empty,
    error::ApiError,
    moviehash::{MovieHash, compute_movie_hash},
    opensubtitles::TitleQuery,
    relay::{RelayResponse, ResponseBody, excerpt},
    search::filter_by_title_and_year,
    upload::StagedUpload,
};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    query: Option<String>,
    year: Option<String>,
    languages: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    total: usize,
    data: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct HashSearchResponse {
    moviehash: MovieHash,
    total: usize,
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    file_id: Option<Value>,
}

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Any `OPTIONS` is accepted; everything else on an unknown path is a 404.
pub async fn not_found(method: Method) -> Result<StatusCode, ApiError> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK);
    }
    Err(ApiError::not_found("Endpoint not found"))
}

pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn search_subtitles(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params
        .query
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("query is required"))?;
    let year = params
        .year
        .as_deref()
        .and_then(non_empty)
        .map(|value| {
            value
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("year must be a number, got {value:?}")))
        })
        .transpose()?;
    let languages = params
        .languages
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(state.config.default_languages.as_str());

    let request = state
        .upstream
        .title_search_request(&TitleQuery {
            query,
            year,
            languages,
        })
        .map_err(|error| ApiError::internal(format!("Invalid upstream URL: {error}")))?;
    let response = state.upstream.send(request).await?;
    let items = result_items(expect_success(response, "Subtitle search failed")?)?;

    let received = items.len();
    let data = filter_by_title_and_year(items, query, year);
    info!(
        "Title search {:?} (year {:?}): kept {} of {} result(s)",
        query,
        year,
        data.len(),
        received
    );

    Ok(Json(SearchResponse {
        total: data.len(),
        data,
    }))
}

pub async fn search_by_hash(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<HashSearchResponse>, ApiError> {
    let mut multipart = multipart
        .map_err(|error| ApiError::bad_request(format!("Invalid multipart body: {error}")))?;
    let mut staged: Option<StagedUpload> = None;
    let mut languages: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::bad_request(format!("Invalid multipart body: {error}")))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("file") | Some("video") if staged.is_none() => {
                staged = Some(
                    StagedUpload::from_field(
                        &state.config.upload_dir,
                        state.config.max_upload_bytes,
                        field,
                    )
                    .await?,
                );
            }
            Some("languages") => {
                let text = field.text().await.map_err(|error| {
                    ApiError::bad_request(format!("Invalid languages field: {error}"))
                })?;
                languages = non_empty(&text).map(ToString::to_string);
            }
            _ => {}
        }
    }

    let staged = staged.ok_or_else(|| ApiError::bad_request("file is required"))?;
    let result = hash_and_search(&state, &staged, languages.as_deref()).await;
    staged.cleanup().await;

    result.map(Json)
}

async fn hash_and_search(
    state: &AppState,
    staged: &StagedUpload,
    languages: Option<&str>,
) -> Result<HashSearchResponse, ApiError> {
    let moviehash = compute_movie_hash(staged.path()).await?;
    info!("Computed movie hash {} for {} byte upload", moviehash, staged.len());

    let request = state
        .upstream
        .hash_search_request(moviehash, languages)
        .map_err(|error| ApiError::internal(format!("Invalid upstream URL: {error}")))?;
    let response = state.upstream.send(request).await?;
    let data = result_items(expect_success(response, "Subtitle search failed")?)?;

    Ok(HashSearchResponse {
        moviehash,
        total: data.len(),
        data,
    })
}

pub async fn download_subtitle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<DownloadRequest>(&body)
                .map_err(|error| ApiError::bad_request(format!("Invalid JSON body: {error}")))?,
        )
    };
    let file_id = payload
        .and_then(|payload| payload.file_id)
        .filter(is_present)
        .ok_or_else(|| ApiError::bad_request("file_id is required"))?;

    let request = state
        .upstream
        .download_request(&file_id)
        .map_err(|error| ApiError::internal(format!("Invalid upstream URL: {error}")))?;
    let response = state.upstream.send(request).await?;
    let data = expect_success(response, "Subtitle download failed")?.into_json()?;

    info!("Relayed download for file_id {}", file_id);
    Ok(Json(data))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => non_empty(text).is_some(),
        _ => true,
    }
}

fn expect_success(response: RelayResponse, message: &str) -> Result<RelayResponse, ApiError> {
    if response.is_success() {
        return Ok(response);
    }

    warn!(
        "Upstream answered {} {}: {}",
        response.status().as_u16(),
        response.status_text(),
        excerpt(response.text())
    );
    if matches!(response.body(), ResponseBody::Unparseable { .. })
        && let Err(error) = response.json()
    {
        return Err(error.into());
    }

    Err(ApiError::upstream(response.status(), message))
}

/// Extracts the `data` array of a search response.
fn result_items(response: RelayResponse) -> Result<Vec<Value>, ApiError> {
    let mut body = response.into_json()?;
    match body.get_mut("data").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => {
            warn!("Upstream search response has no data array");
            Err(ApiError::internal("Upstream returned a malformed response.")
                .with_code("MALFORMED_RESPONSE"))
        }
    }
}
