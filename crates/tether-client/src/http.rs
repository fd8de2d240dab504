use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tether_core::{
    LivenessProbe, ProbeError, RequestOptions, Response, ResponseMeta, Transport, TransportError,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Bytes of an error response kept for `TransportError::Server`.
pub const ERROR_BODY_LIMIT: usize = 4096;
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Transport`] over a shared reqwest client.
///
/// A request's `timeout` bounds the wait for the response head only; an
/// open body may stream for as long as the server keeps it alive.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// A liveness probe sharing this transport's connection pool.
    pub fn probe_for(&self, url: impl Into<String>) -> HttpProbe {
        HttpProbe::with_client(self.client.clone(), url)
    }

    async fn send(&self, request: &RequestOptions) -> Result<reqwest::Response, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::Connect(format!("invalid method {:?}", request.method)))?;

        let mut builder = self.client.request(method, request.uri());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let send = builder.send();
        let resp = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => send.await,
        };
        resp.map_err(|e| TransportError::Connect(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(
        &self,
        request: &RequestOptions,
        cancel: CancellationToken,
    ) -> Result<Response, TransportError> {
        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            resp = self.send(request) => resp?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                body = read_error_body(resp, request.timeout) => body,
            };
            debug!(status = status.as_u16(), "server refused the stream");
            return Err(TransportError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let meta = ResponseMeta {
            status: status.as_u16(),
            headers: resp
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            url: resp.url().to_string(),
        };
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())));

        Ok(Response {
            meta,
            body: Box::pin(body),
        })
    }
}

/// First [`ERROR_BODY_LIMIT`] bytes of an error response, read for at most
/// the request timeout (or five seconds without one).
async fn read_error_body(resp: reqwest::Response, limit: Option<Duration>) -> String {
    let mut body = Vec::new();
    let mut chunks = resp.bytes_stream();
    let read = async {
        while let Some(Ok(chunk)) = chunks.next().await {
            let room = ERROR_BODY_LIMIT - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= ERROR_BODY_LIMIT {
                break;
            }
        }
    };
    if tokio::time::timeout(limit.unwrap_or(ERROR_BODY_TIMEOUT), read).await.is_err() {
        debug!(read = body.len(), "error body still streaming, truncated");
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Liveness probe passing when a GET to `url` answers 2xx.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Option<Duration>,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProbeError::new(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let mut req = self.client.get(&self.url);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(|e| ProbeError::new(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::new(format!("{} answered {}", self.url, resp.status())))
        }
    }
}
