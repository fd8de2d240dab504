use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// Inactivity timer of one connected stream.
///
/// Armed when the stream attaches and pushed back on every chunk. Once it
/// fires it stays disarmed until the next chunk, so a stalled stream yields
/// one expiry, not one per window.
pub(crate) struct Watchdog {
    window: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Watchdog {
    /// `None` disables the watchdog entirely.
    pub(crate) fn new(window: Option<Duration>) -> Self {
        let mut watchdog = Self { window, deadline: None };
        watchdog.reset();
        watchdog
    }

    pub(crate) fn reset(&mut self) {
        let Some(window) = self.window else {
            return;
        };
        match self.deadline.as_mut() {
            Some(deadline) => deadline.as_mut().reset(Instant::now() + window),
            None => self.deadline = Some(Box::pin(sleep(window))),
        }
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the window elapses without a reset. Never resolves
    /// while disarmed.
    pub(crate) async fn expired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
            }
            None => pending().await,
        }
    }
}
