//! HTTP request handlers for the development backend

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use hyper::{Request, Response, StatusCode};
use partwise_core::StorageKey;
use partwise_engine::EngineError;
use partwise_net::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::AppState;

type ResponseBody = Full<Bytes>;

/// Handler failure, mapped onto an HTTP status
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Expired(_) | ProtocolError::BadSignature => {
                ApiError::Forbidden(err.to_string())
            }
            ProtocolError::BodyTooLarge(..) => ApiError::PayloadTooLarge(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownUpload(_) => ApiError::NotFound(err.to_string()),
            EngineError::InvalidPartList(_)
            | EngineError::MissingPart(_)
            | EngineError::EtagMismatch { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

type HandlerResult = Result<Response<ResponseBody>, ApiError>;

/// Main request handler
pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "handling request");

    let result = match Route::resolve(method.as_str(), &path) {
        Ok(Some(route)) => dispatch(route, req, &state).await,
        Ok(None) => Err(ApiError::NotFound("Not found".to_string())),
        Err(e) => Err(e.into()),
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            match &e {
                ApiError::Internal(msg) => error!(%method, %path, "handler error: {}", msg),
                other => warn!(%method, %path, "request rejected: {}", other),
            }
            error_response(&e)
        }
    };

    info!(%method, %path, status = response.status().as_u16(), "request complete");
    Ok(response)
}

async fn dispatch(route: Route, req: Request<Incoming>, state: &AppState) -> HandlerResult {
    match route {
        Route::Health => handle_health(),
        Route::CreateMultipart => handle_create(req, state).await,
        Route::AuthorizeParts { upload_id } => handle_authorize(req, state, &upload_id).await,
        Route::PutPart {
            upload_id,
            part_number,
        } => handle_put_part(req, state, &upload_id, part_number).await,
        Route::CompleteMultipart { upload_id } => handle_complete(req, state, &upload_id).await,
        Route::AbortMultipart { upload_id } => handle_abort(state, &upload_id),
        Route::DownloadUrl => handle_download_url(req, state).await,
        Route::GetObject { key } => handle_get_object(req, state, &key),
        Route::DeleteObject { key } => handle_delete_object(state, &key),
    }
}

fn handle_health() -> HandlerResult {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "partwise"
        }),
    )
}

async fn handle_create(req: Request<Incoming>, state: &AppState) -> HandlerResult {
    let request: CreateMultipartRequest = read_json(req).await?;
    let upload = state
        .area
        .create_upload(&request.key, &request.content_type)?;

    json_response(
        StatusCode::OK,
        &CreateMultipartResponse {
            upload_id: upload.upload_id,
        },
    )
}

async fn handle_authorize(req: Request<Incoming>, state: &AppState, upload_id: &str) -> HandlerResult {
    let request: AuthorizePartsRequest = read_json(req).await?;
    request.validate()?;

    if state.area.upload(upload_id)?.is_none() {
        return Err(EngineError::UnknownUpload(upload_id.to_string()).into());
    }

    let expires_at = expiry_after(Utc::now(), request.expires_in_secs)?;

    let authorizations = request
        .part_numbers
        .iter()
        .map(|&part_number| PartAuthorization {
            part_number,
            url: state
                .signer
                .presign_part(&state.public_url, upload_id, part_number, expires_at),
            expires_at,
        })
        .collect();

    debug!(upload_id, parts = request.part_numbers.len(), "parts authorized");
    json_response(StatusCode::OK, &AuthorizePartsResponse { authorizations })
}

async fn handle_put_part(
    req: Request<Incoming>,
    state: &AppState,
    upload_id: &str,
    part_number: u32,
) -> HandlerResult {
    let query = req.uri().query().unwrap_or("");
    state
        .signer
        .verify_part(upload_id, part_number, query, Utc::now())?;

    if let Some(len) = declared_length(&req) {
        validate_part_body(len)?;
    }

    let body = read_body(req, MAX_PART_SIZE as usize).await?;
    let etag = state.area.put_part(upload_id, part_number, &body)?;

    let mut response = empty_response(StatusCode::OK);
    let value = HeaderValue::from_str(&etag.quoted())
        .map_err(|e| ApiError::Internal(format!("etag header: {}", e)))?;
    response.headers_mut().insert(ETAG, value);
    Ok(response)
}

async fn handle_complete(req: Request<Incoming>, state: &AppState, upload_id: &str) -> HandlerResult {
    let request: CompleteMultipartRequest = read_json(req).await?;
    let object = state.area.complete(upload_id, &request.parts)?;

    json_response(
        StatusCode::OK,
        &CompleteMultipartResponse {
            key: object.key,
            size: object.size,
            etag: object.etag,
        },
    )
}

fn handle_abort(state: &AppState, upload_id: &str) -> HandlerResult {
    if state.area.abort(upload_id)? {
        Ok(empty_response(StatusCode::NO_CONTENT))
    } else {
        Err(EngineError::UnknownUpload(upload_id.to_string()).into())
    }
}

async fn handle_download_url(req: Request<Incoming>, state: &AppState) -> HandlerResult {
    let request: DownloadUrlRequest = read_json(req).await?;
    request.validate()?;

    if state.area.object(&request.key)?.is_none() {
        return Err(ApiError::NotFound(format!("Object not found: {}", request.key)));
    }

    let expires_at = expiry_after(Utc::now(), request.expires_in_secs)?;
    let url = state
        .signer
        .presign_download(&state.public_url, &request.key, expires_at);

    json_response(StatusCode::OK, &DownloadUrlResponse { url, expires_at })
}

fn handle_get_object(req: Request<Incoming>, state: &AppState, key: &StorageKey) -> HandlerResult {
    let query = req.uri().query().unwrap_or("");
    state.signer.verify_download(key, query, Utc::now())?;

    let Some((object, data)) = state.area.read_object(key)? else {
        return Err(ApiError::NotFound(format!("Object not found: {}", key)));
    };

    let mut response = Response::new(Full::new(Bytes::from(data)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(object.size));
    if let Ok(value) = HeaderValue::from_str(&object.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        headers.insert(ETAG, value);
    }
    Ok(response)
}

fn handle_delete_object(state: &AppState, key: &StorageKey) -> HandlerResult {
    if state.area.delete_object(key)? {
        Ok(empty_response(StatusCode::NO_CONTENT))
    } else {
        Err(ApiError::NotFound(format!("Object not found: {}", key)))
    }
}

fn declared_length(req: &Request<Incoming>) -> Option<u64> {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn read_body(req: Request<Incoming>, limit: usize) -> Result<Bytes, ApiError> {
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ApiError::PayloadTooLarge(
            format!("Body exceeds {} bytes", limit),
        )),
        Err(e) => Err(ApiError::BadRequest(format!("Failed to read request body: {}", e))),
    }
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, ApiError> {
    let body = read_body(req, MAX_CONTROL_BODY_SIZE).await?;
    validate_control_body(body.len())?;
    serde_json::from_slice(&body).map_err(|e| ProtocolError::MalformedBody(e).into())
}

fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HandlerResult {
    let body = serde_json::to_vec(body).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn error_response(err: &ApiError) -> Response<ResponseBody> {
    let body = serde_json::to_vec(&ErrorBody::new(err.to_string())).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = err.status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
