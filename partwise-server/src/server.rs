//! HTTP/1.1 server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use partwise_engine::{PartArea, StorageEngine};
use partwise_net::UrlSigner;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::handlers::handle_request;

/// Shared state for request handlers
pub struct AppState {
    pub area: PartArea,
    pub signer: UrlSigner,
    /// Base URL clients use to reach this server, embedded in presigned URLs
    pub public_url: String,
}

pub struct DevServer {
    state: Arc<AppState>,
}

impl DevServer {
    pub fn new(
        storage: StorageEngine,
        signing_secret: &[u8],
        public_url: impl Into<String>,
    ) -> partwise_engine::EngineResult<Self> {
        let state = AppState {
            area: storage.part_area()?,
            signer: UrlSigner::new(signing_secret),
            public_url: public_url.into(),
        };
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Accept connections on an already bound listener until it fails
    pub async fn serve_listener(self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, public_url = %self.state.public_url, "partwise dev server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            debug!(%remote_addr, "new connection");

            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(err) = Self::handle_connection(stream, state).await {
                    error!(%remote_addr, "connection error: {}", err);
                }
            });
        }
    }

    async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> hyper::Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let state = state.clone();
            async move { handle_request(req, state).await }
        });

        http1::Builder::new().serve_connection(io, service).await
    }
}
