//! Raw part transfer to presigned URLs

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::ETAG;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use partwise_core::Etag;

use crate::{ClientError, Result};

/// Response to a part PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub status: u16,
    /// Raw `ETag` header value, quotes included
    pub etag: Option<String>,
}

impl PutOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The etag with surrounding quotes stripped; `None` if absent or empty
    pub fn etag(&self) -> Option<Etag> {
        self.etag.as_deref().and_then(Etag::from_header)
    }
}

#[async_trait]
pub trait PartTransport: Send + Sync {
    /// PUT `body` to a presigned `url`
    async fn put_part(&self, url: &str, body: Bytes) -> Result<PutOutcome>;
}

/// hyper-based transport; plain HTTP unless built with another connector
#[derive(Clone)]
pub struct HyperTransport<C = HttpConnector> {
    client: Client<C, Full<Bytes>>,
}

impl HyperTransport<HttpConnector> {
    pub fn new() -> Self {
        HyperTransport {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HyperTransport<HttpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> HyperTransport<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    pub fn with_client(client: Client<C, Full<Bytes>>) -> Self {
        HyperTransport { client }
    }
}

#[async_trait]
impl<C> PartTransport for HyperTransport<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn put_part(&self, url: &str, body: Bytes) -> Result<PutOutcome> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ClientError::Transport(format!("invalid part URL: {}", e)))?;

        let req = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .body(Full::new(body))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Drain so the connection can be reused
        resp.into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(PutOutcome { status, etag })
    }
}
