//! Route layout of the control API and the part/object data paths

use partwise_core::StorageKey;

use crate::ProtocolError;

pub const HEALTH_PATH: &str = "/health";
pub const MULTIPART_PATH: &str = "/v1/multipart";
pub const PARTS_PREFIX: &str = "/v1/parts/";
pub const OBJECTS_PREFIX: &str = "/v1/objects/";
pub const DOWNLOAD_URL_PATH: &str = "/v1/download-url";

/// Routes the development backend serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    /// `POST /v1/multipart`
    CreateMultipart,
    /// `POST /v1/multipart/{uploadId}/authorize`
    AuthorizeParts { upload_id: String },
    /// `POST /v1/multipart/{uploadId}/complete`
    CompleteMultipart { upload_id: String },
    /// `DELETE /v1/multipart/{uploadId}`
    AbortMultipart { upload_id: String },
    /// `PUT /v1/parts/{uploadId}/{partNumber}`
    PutPart { upload_id: String, part_number: u32 },
    /// `POST /v1/download-url`
    DownloadUrl,
    /// `GET /v1/objects/{key}`
    GetObject { key: StorageKey },
    /// `DELETE /v1/objects/{key}`
    DeleteObject { key: StorageKey },
}

impl Route {
    /// Match a method and path. `Ok(None)` means no route exists.
    pub fn resolve(method: &str, path: &str) -> Result<Option<Route>, ProtocolError> {
        if path == HEALTH_PATH {
            return Ok((method == "GET").then_some(Route::Health));
        }

        if path == DOWNLOAD_URL_PATH {
            return Ok((method == "POST").then_some(Route::DownloadUrl));
        }

        if path == MULTIPART_PATH {
            return Ok((method == "POST").then_some(Route::CreateMultipart));
        }

        if let Some(rest) = path.strip_prefix(MULTIPART_PATH).and_then(|r| r.strip_prefix('/')) {
            let segments: Vec<&str> = rest.split('/').collect();
            let route = match (method, segments.as_slice()) {
                ("POST", [upload_id, "authorize"]) => Some(Route::AuthorizeParts {
                    upload_id: parse_upload_id(upload_id)?,
                }),
                ("POST", [upload_id, "complete"]) => Some(Route::CompleteMultipart {
                    upload_id: parse_upload_id(upload_id)?,
                }),
                ("DELETE", [upload_id]) => Some(Route::AbortMultipart {
                    upload_id: parse_upload_id(upload_id)?,
                }),
                _ => None,
            };
            return Ok(route);
        }

        if let Some(rest) = path.strip_prefix(PARTS_PREFIX) {
            let segments: Vec<&str> = rest.split('/').collect();
            let route = match (method, segments.as_slice()) {
                ("PUT", [upload_id, part_number]) => Some(Route::PutPart {
                    upload_id: parse_upload_id(upload_id)?,
                    part_number: parse_part_number(part_number)?,
                }),
                _ => None,
            };
            return Ok(route);
        }

        if let Some(rest) = path.strip_prefix(OBJECTS_PREFIX) {
            let key = StorageKey::new(rest)
                .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
            let route = match method {
                "GET" => Some(Route::GetObject { key }),
                "DELETE" => Some(Route::DeleteObject { key }),
                _ => None,
            };
            return Ok(route);
        }

        Ok(None)
    }
}

fn parse_upload_id(raw: &str) -> Result<String, ProtocolError> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ProtocolError::InvalidRequest(format!(
            "invalid upload id '{}'",
            raw
        )));
    }
    Ok(raw.to_string())
}

fn parse_part_number(raw: &str) -> Result<u32, ProtocolError> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ProtocolError::InvalidRequest(format!(
            "invalid part number '{}'",
            raw
        ))),
    }
}

pub fn authorize_path(upload_id: &str) -> String {
    format!("{}/{}/authorize", MULTIPART_PATH, upload_id)
}

pub fn complete_path(upload_id: &str) -> String {
    format!("{}/{}/complete", MULTIPART_PATH, upload_id)
}

pub fn abort_path(upload_id: &str) -> String {
    format!("{}/{}", MULTIPART_PATH, upload_id)
}

pub fn part_path(upload_id: &str, part_number: u32) -> String {
    format!("{}{}/{}", PARTS_PREFIX, upload_id, part_number)
}

pub fn object_path(key: &StorageKey) -> String {
    format!("{}{}", OBJECTS_PREFIX, key.as_str())
}

/// Split a query string into `(name, value)` pairs. Values used by this
/// protocol are digits and hex, so no percent-decoding is done.
pub fn parse_query(query: &str) -> Vec<(&str, &str)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect()
}

/// Join a base URL and an absolute path without doubling the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
