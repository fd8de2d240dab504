use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use crate::errors::ProbeError;

/// Caller-supplied check run before a reconnection is allowed.
///
/// `Ok(())` means the peer looks reachable; any error means "not yet".
/// Implementations should not retry internally, the scheduler owns the
/// polling cadence.
#[async_trait]
pub trait LivenessProbe: Send + Sync + 'static {
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Adapts an async closure into a [`LivenessProbe`].
pub struct FnProbe<F> {
    f: F,
}

impl<F> fmt::Debug for FnProbe<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProbe")
    }
}

#[async_trait]
impl<F, Fut> LivenessProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    async fn check(&self) -> Result<(), ProbeError> {
        (self.f)().await
    }
}

/// Build a probe from a closure returning a future.
pub fn probe_fn<F, Fut>(f: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    FnProbe { f }
}
