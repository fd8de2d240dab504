use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::request::RequestOptions;

/// Raw response body. The stream ending is the "close" notification, an
/// `Err` item is the "error" notification.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// What the peer answered before the body started flowing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub url: String,
}

impl ResponseMeta {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A successfully opened streaming response.
pub struct Response {
    pub meta: ResponseMeta,
    pub body: BodyStream,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response").field("meta", &self.meta).finish_non_exhaustive()
    }
}

/// The HTTP capability the controller drives.
///
/// `cancel` is cooperative: a transport should stop as soon as it can once
/// the token fires, but the controller never relies on it and filters late
/// results itself.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn issue(
        &self,
        request: &RequestOptions,
        cancel: CancellationToken,
    ) -> Result<Response, TransportError>;
}
