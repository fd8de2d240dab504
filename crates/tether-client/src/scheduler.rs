use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use tether_core::{ConnectionEvent, LivenessProbe, ProbeError};

use crate::controller::{Shared, State};

/// The single pending-reconnect slot.
pub(crate) enum Retry {
    Idle,
    /// Timer running; the attempt is issued when it fires.
    Waiting { task: JoinHandle<()> },
    /// Polling the liveness probe; the attempt is issued on the first pass.
    Probing { since: Instant, task: JoinHandle<()> },
}

impl Retry {
    pub(crate) fn is_pending(&self) -> bool {
        !matches!(self, Retry::Idle)
    }
}

impl Shared {
    /// Schedule one reconnection. Returns false when the stream is destroyed
    /// or a reconnection is already scheduled.
    pub(crate) fn reconnect_locked(self: &Arc<Self>, st: &mut State, delay: Option<Duration>) -> bool {
        if st.destroyed {
            debug!("destroyed, can't reconnect");
            return false;
        }
        if st.retry.is_pending() {
            debug!("already trying to reconnect");
            return false;
        }

        let delay = delay.unwrap_or_else(|| self.policy.wait_before_reconnect());
        st.retry_seq += 1;
        let token = st.retry_seq;
        let probe = self.policy.liveness_probe.clone();

        info!(delay_ms = delay.as_millis() as u64, probing = probe.is_some(), "reconnecting");
        self.emit(ConnectionEvent::Reconnecting {
            delay,
            probing: probe.is_some(),
        });

        let shared = Arc::clone(self);
        st.retry = match probe {
            Some(probe) => Retry::Probing {
                since: Instant::now(),
                task: tokio::spawn(
                    shared
                        .probe_then_reconnect(token, delay, probe)
                        .instrument(self.span.clone()),
                ),
            },
            None => Retry::Waiting {
                task: tokio::spawn(shared.wait_then_reconnect(token, delay).instrument(self.span.clone())),
            },
        };
        true
    }

    pub(crate) fn cancel_retry_locked(&self, st: &mut State) {
        match mem::replace(&mut st.retry, Retry::Idle) {
            Retry::Idle => {}
            Retry::Waiting { task } | Retry::Probing { task, .. } => {
                debug!("scheduled reconnection cancelled");
                task.abort();
            }
        }
    }

    async fn wait_then_reconnect(self: Arc<Self>, token: u64, delay: Duration) {
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.fire_reconnect(token);
    }

    /// Wait out `delay`, then poll the probe every `probe_interval` until it
    /// passes. A slow check delays the next tick rather than failing, unless
    /// the policy sets a `probe_timeout`.
    async fn probe_then_reconnect(self: Arc<Self>, token: u64, delay: Duration, probe: Arc<dyn LivenessProbe>) {
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let period = self.policy.probe_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = match self.policy.probe_timeout() {
                Some(limit) => match timeout(limit, probe.check()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProbeError::new(format!("no answer within {}ms", limit.as_millis()))),
                },
                None => probe.check().await,
            };
            match outcome {
                Ok(()) => break,
                Err(error) => self.on_probe_failed(token, &error),
            }
        }
        self.fire_reconnect(token);
    }

    fn on_probe_failed(&self, token: u64, error: &ProbeError) {
        let mut st = self.state.lock();
        if st.retry_seq != token {
            return;
        }
        st.stats.probe_failures += 1;
        debug!(failures = st.stats.probe_failures, error = %error, "liveness probe failed");
    }

    /// Timer or probe completion. Stale tokens are ignored.
    fn fire_reconnect(self: &Arc<Self>, token: u64) {
        let mut st = self.state.lock();
        if !st.retry.is_pending() || st.retry_seq != token {
            return;
        }
        if let Retry::Probing { since, .. } = mem::replace(&mut st.retry, Retry::Idle) {
            debug!(waited_ms = since.elapsed().as_millis() as u64, "liveness probe passed");
        }
        if st.destroyed {
            warn!("destroyed, dropping scheduled reconnection");
            return;
        }
        st.stats.reconnect_count += 1;
        self.emit(ConnectionEvent::Reconnect);
        self.connect_locked(&mut st);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_is_not_pending() {
        assert!(!Retry::Idle.is_pending());
        let task = tokio::spawn(async {});
        assert!(Retry::Waiting { task }.is_pending());
    }
}
