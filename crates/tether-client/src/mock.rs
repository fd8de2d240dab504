use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use tether_core::{RequestOptions, Response, ResponseMeta, Transport, TransportError};

pub type ChunkSender = mpsc::UnboundedSender<Result<Bytes, TransportError>>;

/// Pre-programmed transport answers for deterministic testing without a
/// server.
pub enum MockResponse {
    /// 200, then these chunks, then a clean end of stream.
    Body(Vec<Result<Bytes, TransportError>>),
    /// 200, then these chunks, then silence until the attempt is cancelled.
    Open(Vec<Bytes>),
    /// 200, then whatever the paired [`ChunkSender`] pushes. Dropping the
    /// sender ends the stream.
    Channel(mpsc::UnboundedReceiver<Result<Bytes, TransportError>>),
    /// Fail the request itself.
    Error(TransportError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never answer.
    Pending,
}

impl MockResponse {
    /// A body of text chunks that ends cleanly.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        Self::Body(chunks.into_iter().map(|c| Ok(c.into())).collect())
    }

    /// A response that connects and never sends anything.
    pub fn silent() -> Self {
        Self::Open(Vec::new())
    }

    pub fn channel() -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::Channel(rx))
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Transport answering each request with the next scripted response. Once
/// the script runs out, requests hang until cancelled.
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    call_count: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Append to the script.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// URIs of every request issued so far.
    pub fn requested_uris(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn issue(&self, request: &RequestOptions, cancel: CancellationToken) -> Result<Response, TransportError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let uri = request.uri();
        self.requested.lock().push(uri.clone());

        let next = self.responses.lock().pop_front();
        let Some(response) = next else {
            cancel.cancelled().await;
            return Err(TransportError::Cancelled);
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = resolve_response(response, uri) => result,
        }
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse, uri: String) -> Result<Response, TransportError> {
    let mut current = response;
    loop {
        let body: tether_core::BodyStream = match current {
            MockResponse::Body(chunks) => Box::pin(stream::iter(chunks)),
            MockResponse::Open(chunks) => Box::pin(
                stream::iter(chunks)
                    .map(Ok::<Bytes, TransportError>)
                    .chain(stream::pending()),
            ),
            MockResponse::Channel(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
                continue;
            }
            MockResponse::Pending => return std::future::pending().await,
        };
        return Ok(Response {
            meta: ResponseMeta {
                status: 200,
                headers: vec![("content-type".into(), "application/octet-stream".into())],
                url: uri,
            },
            body,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestOptions {
        RequestOptions::get("http://mock/stream").with_param("since", Some("1"))
    }

    #[tokio::test]
    async fn body_response() {
        let mock = MockTransport::new(vec![MockResponse::chunks(["a", "b"])]);
        let response = mock.issue(&request(), CancellationToken::new()).await.unwrap();
        assert_eq!(response.meta.status, 200);
        assert_eq!(response.meta.url, "http://mock/stream?since=1");

        let chunks: Vec<_> = response.body.collect().await;
        assert_eq!(chunks, vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))]);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.requested_uris(), vec!["http://mock/stream?since=1".to_string()]);
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockTransport::new(vec![MockResponse::Error(TransportError::Connect("refused".into()))]);
        let err = mock.issue(&request(), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, TransportError::Connect("refused".into()));
    }

    #[tokio::test]
    async fn channel_response_follows_sender() {
        let (tx, response) = MockResponse::channel();
        let mock = MockTransport::new(vec![response]);
        let mut body = mock.issue(&request(), CancellationToken::new()).await.unwrap().body;

        tx.send(Ok(Bytes::from("x"))).unwrap();
        assert_eq!(body.next().await, Some(Ok(Bytes::from("x"))));
        drop(tx);
        assert_eq!(body.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response_waits() {
        let mock = MockTransport::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::chunks(["late"]),
        )]);
        let start = tokio::time::Instant::now();
        let _ = mock.issue(&request(), CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_delay() {
        let mock = MockTransport::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::chunks(["never"]),
        )]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = mock.issue(&request(), cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_script_hangs_until_cancelled() {
        let mock = MockTransport::new(vec![]);
        let cancel = CancellationToken::new();
        let pending = tokio::time::timeout(Duration::from_secs(5), mock.issue(&request(), cancel.clone())).await;
        assert!(pending.is_err());

        cancel.cancel();
        let err = mock.issue(&request(), cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(mock.call_count(), 2);
    }
}
