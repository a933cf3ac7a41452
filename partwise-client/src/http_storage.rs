//! `ObjectStorage` over the partwise HTTP control API

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use partwise_core::{CompletedPart, StorageKey};
use partwise_net::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{ClientError, ObjectStorage, Result};

/// Talks to a `partwise-server` (or anything serving the same routes)
#[derive(Clone)]
pub struct HttpObjectStorage {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let _uri: Uri = base_url
            .parse()
            .map_err(|e| ClientError::Backend(format!("Invalid endpoint URL '{}': {}", base_url, e)))?;

        Ok(HttpObjectStorage {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<(StatusCode, Bytes)> {
        let url = join_url(&self.base_url, path);
        let mut builder = Request::builder().method(method.clone()).uri(&url);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ClientError::Transport(format!("{} {}: {}", method, path, e)))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_bytes();

        debug!(%method, path, status = status.as_u16(), "control request");
        Ok((status, body))
    }

    async fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| ClientError::Backend(e.to_string()))?;
        let (status, body) = self.send(Method::POST, path, Some(body)).await?;
        if !status.is_success() {
            return Err(backend_error(&Method::POST, path, status, &body));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ClientError::Backend(format!("Invalid response from {}: {}", path, e)))
    }

    /// DELETE treating 404 as already gone
    async fn delete(&self, path: &str) -> Result<()> {
        let (status, body) = self.send(Method::DELETE, path, None).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(backend_error(&Method::DELETE, path, status, &body))
        }
    }
}

fn backend_error(method: &Method, path: &str, status: StatusCode, body: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    ClientError::Backend(format!(
        "{} {} returned {}: {}",
        method,
        path,
        status.as_u16(),
        message
    ))
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn create_multipart(&self, key: &StorageKey, content_type: &str) -> Result<String> {
        let request = CreateMultipartRequest {
            key: key.clone(),
            content_type: content_type.to_string(),
        };
        let response: CreateMultipartResponse = self.post_json(MULTIPART_PATH, &request).await?;
        Ok(response.upload_id)
    }

    async fn authorize_parts(
        &self,
        upload_id: &str,
        _key: &StorageKey,
        part_numbers: &[u32],
        ttl: Duration,
    ) -> Result<Vec<PartAuthorization>> {
        let request = AuthorizePartsRequest {
            part_numbers: part_numbers.to_vec(),
            expires_in_secs: ttl.as_secs().max(1),
        };
        let response: AuthorizePartsResponse =
            self.post_json(&authorize_path(upload_id), &request).await?;
        Ok(response.authorizations)
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        _key: &StorageKey,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let request = CompleteMultipartRequest {
            parts: parts.to_vec(),
        };
        let _: CompleteMultipartResponse = self.post_json(&complete_path(upload_id), &request).await?;
        Ok(())
    }

    async fn abort_multipart(&self, upload_id: &str, _key: &StorageKey) -> Result<()> {
        self.delete(&abort_path(upload_id)).await
    }

    async fn delete_object(&self, key: &StorageKey) -> Result<()> {
        self.delete(&object_path(key)).await
    }

    async fn download_url(&self, key: &StorageKey, ttl: Duration) -> Result<String> {
        let request = DownloadUrlRequest {
            key: key.clone(),
            expires_in_secs: ttl.as_secs().max(1),
        };
        let response: DownloadUrlResponse = self.post_json(DOWNLOAD_URL_PATH, &request).await?;
        Ok(response.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_normalized() {
        let storage = HttpObjectStorage::new("http://127.0.0.1:9000/").unwrap();
        assert_eq!(storage.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(HttpObjectStorage::new("http://bad host").is_err());
    }

    #[test]
    fn test_backend_error_uses_error_body() {
        let err = backend_error(
            &Method::POST,
            "/v1/multipart",
            StatusCode::BAD_REQUEST,
            br#"{"error":"Invalid part list: no parts listed"}"#,
        );
        assert_eq!(
            err.to_string(),
            "Storage backend error: POST /v1/multipart returned 400: Invalid part list: no parts listed"
        );
    }
}
