use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use tether_core::{
    BodyStream, ConfigError, ConnectionEvent, LivenessProbe, Policy, RequestOptions,
    ResponseMeta, StreamId, Transport, TransportError,
};

use crate::keepalive::Watchdog;
use crate::scheduler::Retry;
use crate::stats::ConnectionStats;

/// Bytes received on one attempt's stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub attempt: u64,
    pub bytes: Bytes,
}

/// Continuous feed of every connected attempt's data, in arrival order.
/// Ends when the stream is destroyed.
pub type DataStream = ReceiverStream<Chunk>;

/// Where the stream stands right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Destroyed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Connecting,
    Connected,
}

struct Attempt {
    seq: u64,
    cancel: CancellationToken,
    phase: Phase,
}

/// Why a pump stopped reading its body.
enum StreamExit {
    /// Cancelled or superseded; nothing to report.
    Released,
    Ended,
    Failed(TransportError),
}

pub(crate) struct State {
    seq: u64,
    attempt: Option<Attempt>,
    pub(crate) retry: Retry,
    pub(crate) retry_seq: u64,
    pub(crate) destroyed: bool,
    pub(crate) stats: ConnectionStats,
    data: Option<mpsc::Sender<Chunk>>,
    data_taken: bool,
}

impl State {
    fn new() -> Self {
        Self {
            seq: 0,
            attempt: None,
            retry: Retry::Idle,
            retry_seq: 0,
            destroyed: false,
            stats: ConnectionStats::default(),
            data: None,
            data_taken: false,
        }
    }

    /// The single authority on whether a continuation may touch state.
    fn is_current(&self, seq: u64) -> bool {
        self.attempt.as_ref().is_some_and(|a| a.seq == seq)
    }

    fn phase(&self) -> Option<Phase> {
        self.attempt.as_ref().map(|a| a.phase)
    }

    fn lifecycle(&self) -> Lifecycle {
        if self.destroyed {
            Lifecycle::Destroyed
        } else if self.retry.is_pending() {
            Lifecycle::Reconnecting
        } else {
            match self.phase() {
                Some(Phase::Connecting) => Lifecycle::Connecting,
                Some(Phase::Connected) => Lifecycle::Connected,
                None => Lifecycle::Idle,
            }
        }
    }
}

pub(crate) struct Shared {
    id: StreamId,
    uri: String,
    transport: Arc<dyn Transport>,
    request: RequestOptions,
    pub(crate) policy: Policy,
    pub(crate) state: Mutex<State>,
    events: broadcast::Sender<ConnectionEvent>,
    pub(crate) span: Span,
}

impl Shared {
    /// Events are emitted under the state lock so subscribers see them in
    /// transition order. Nobody listening is fine.
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            trace!("no event subscribers");
        }
    }

    pub(crate) fn connect_locked(self: &Arc<Self>, st: &mut State) {
        if st.destroyed {
            debug!("destroyed, can't connect");
            return;
        }
        self.cancel_retry_locked(st);
        if self.cancel_attempt_locked(st) {
            self.emit(ConnectionEvent::Abort);
        }

        st.seq += 1;
        st.stats.request_count += 1;
        let seq = st.seq;
        let cancel = CancellationToken::new();
        st.attempt = Some(Attempt {
            seq,
            cancel: cancel.clone(),
            phase: Phase::Connecting,
        });

        debug!(attempt = seq, "connecting");
        self.emit(ConnectionEvent::Connecting { attempt: seq });

        let shared = Arc::clone(self);
        tokio::spawn(shared.run_attempt(seq, cancel).instrument(self.span.clone()));
    }

    /// Cancel the outstanding attempt, if any. Its late events are filtered
    /// by sequence whether or not the transport honours the token.
    fn cancel_attempt_locked(&self, st: &mut State) -> bool {
        match st.attempt.take() {
            Some(attempt) => {
                debug!(attempt = attempt.seq, "aborting connection");
                attempt.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn abort(&self) {
        let mut st = self.state.lock();
        let _ = self.cancel_attempt_locked(&mut st);
        self.emit(ConnectionEvent::Abort);
    }

    fn destroy(&self) {
        let mut st = self.state.lock();
        if st.destroyed {
            debug!("already destroyed");
            return;
        }
        st.destroyed = true;
        let _ = self.cancel_attempt_locked(&mut st);
        self.emit(ConnectionEvent::Abort);
        self.cancel_retry_locked(&mut st);
        st.data = None;
        self.emit(ConnectionEvent::Destroy);
        info!(requests = st.stats.request_count, "destroyed");
    }

    async fn run_attempt(self: Arc<Self>, seq: u64, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(attempt = seq, "request cancelled");
                return;
            }
            outcome = self.transport.issue(&self.request, cancel.child_token()) => outcome,
        };

        match outcome {
            Ok(response) => {
                if self.on_response(seq, response.meta) {
                    let exit = self.pump(seq, response.body, &cancel).await;
                    match exit {
                        StreamExit::Released => debug!(attempt = seq, "stream released"),
                        StreamExit::Ended => self.handle_stream_closed(seq, None),
                        StreamExit::Failed(error) => self.handle_stream_closed(seq, Some(error)),
                    }
                }
            }
            Err(error) if error.is_cancelled() => self.on_request_cancelled(seq),
            Err(error) => self.on_request_failed(seq, error),
        }
    }

    /// A transport giving up on its own is not a failure: the attempt is
    /// dropped without events or a reconnection.
    fn on_request_cancelled(&self, seq: u64) {
        let mut st = self.state.lock();
        if st.is_current(seq) {
            st.attempt = None;
        }
        debug!(attempt = seq, "request cancelled");
    }

    fn on_response(&self, seq: u64, meta: ResponseMeta) -> bool {
        let mut st = self.state.lock();
        if !st.is_current(seq) {
            debug!(attempt = seq, "response of a superseded attempt discarded");
            return false;
        }
        if let Some(attempt) = st.attempt.as_mut() {
            attempt.phase = Phase::Connected;
        }
        info!(attempt = seq, status = meta.status, "connected");
        self.emit(ConnectionEvent::Response { attempt: seq, meta });
        true
    }

    fn on_request_failed(self: &Arc<Self>, seq: u64, error: TransportError) {
        let mut st = self.state.lock();
        if !st.is_current(seq) {
            debug!(attempt = seq, error = %error, "failure of a superseded attempt discarded");
            return;
        }
        st.attempt = None;
        st.stats.failure_count += 1;
        warn!(attempt = seq, kind = error.kind(), error = %error, "request failed");

        self.emit(ConnectionEvent::RequestError {
            attempt: seq,
            error: error.clone(),
        });
        if error.is_server_error() {
            self.emit(ConnectionEvent::Error { attempt: seq, error });
        }
        if self.policy.reconnect_on_error {
            let _ = self.reconnect_locked(&mut st, None);
        }
    }

    /// Read the body until it ends, fails, or the attempt is released,
    /// feeding the keepalive watchdog along the way.
    async fn pump(self: &Arc<Self>, seq: u64, mut body: BodyStream, cancel: &CancellationToken) -> StreamExit {
        let mut watchdog = Watchdog::new(self.policy.keepalive_window());
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamExit::Released,
                () = watchdog.expired() => self.on_keepalive_expired(seq),
                next = body.next() => match next {
                    Some(Ok(bytes)) => {
                        watchdog.reset();
                        if !self.deliver(seq, bytes, cancel).await {
                            return StreamExit::Released;
                        }
                    }
                    Some(Err(error)) => return StreamExit::Failed(error),
                    None => return StreamExit::Ended,
                },
            }
        }
    }

    async fn deliver(&self, seq: u64, bytes: Bytes, cancel: &CancellationToken) -> bool {
        let Some(sink) = self.record_chunk(seq, bytes.len()) else {
            return false;
        };
        let Some(sink) = sink else {
            return true;
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            sent = sink.send(Chunk { attempt: seq, bytes }) => {
                if sent.is_err() {
                    self.release_data_sink(&sink);
                }
                true
            }
        }
    }

    /// `None` when the attempt is no longer current, otherwise the data sink
    /// (if a consumer took one).
    fn record_chunk(&self, seq: u64, len: usize) -> Option<Option<mpsc::Sender<Chunk>>> {
        let mut st = self.state.lock();
        if !st.is_current(seq) {
            return None;
        }
        st.stats.record_data(len);
        if self.policy.log_data {
            trace!(attempt = seq, bytes = len, "data");
        }
        Some(st.data.clone())
    }

    fn release_data_sink(&self, sink: &mpsc::Sender<Chunk>) {
        let mut st = self.state.lock();
        if st.data.as_ref().is_some_and(|tx| tx.same_channel(sink)) {
            debug!("data consumer dropped");
            st.data = None;
        }
    }

    fn on_keepalive_expired(self: &Arc<Self>, seq: u64) {
        let mut st = self.state.lock();
        if st.destroyed || !st.is_current(seq) {
            return;
        }
        st.stats.keepalive_expiries += 1;
        warn!(
            attempt = seq,
            keepalive_ms = self.policy.keepalive_ms,
            "no data received within the keepalive window"
        );
        let _ = self.reconnect_locked(&mut st, Some(Duration::ZERO));
    }

    fn handle_stream_closed(self: &Arc<Self>, seq: u64, error: Option<TransportError>) {
        let mut st = self.state.lock();
        if !st.is_current(seq) {
            debug!(attempt = seq, "previous connection closed");
            return;
        }
        st.attempt = None;

        let reconnect = match error {
            Some(error) => {
                st.stats.failure_count += 1;
                warn!(attempt = seq, error = %error, "stream failed");
                self.emit(ConnectionEvent::RequestError { attempt: seq, error });
                self.policy.reconnect_on_error
            }
            None => self.policy.reconnect_on_close,
        };

        debug!(attempt = seq, "connection closed");
        self.emit(ConnectionEvent::Close { attempt: seq });
        if reconnect {
            let _ = self.reconnect_locked(&mut st, None);
        }
    }
}

/// A streaming request kept open across disconnects, errors and stalls.
///
/// Must be used inside a tokio runtime. Dropping the handle destroys the
/// stream.
pub struct PersistentStream {
    inner: Arc<Shared>,
}

impl PersistentStream {
    pub fn builder(transport: Arc<dyn Transport>, request: RequestOptions) -> PersistentStreamBuilder {
        PersistentStreamBuilder {
            transport,
            request,
            policy: Policy::default(),
            id: None,
        }
    }

    /// Build an idle stream from a JSON request record. Non-records are
    /// rejected with `InvalidArgument`.
    pub fn from_value(
        transport: Arc<dyn Transport>,
        request: Value,
        policy: Policy,
    ) -> Result<Self, ConfigError> {
        let request = RequestOptions::from_value(request)?;
        Self::builder(transport, request).policy(policy).build()
    }

    /// Start a new attempt, superseding any outstanding one and any scheduled
    /// reconnection. A no-op once destroyed.
    pub fn connect(&self) {
        let _span = self.inner.span.enter();
        let mut st = self.inner.state.lock();
        self.inner.connect_locked(&mut st);
    }

    /// Schedule a reconnection after `delay`, or after the policy's
    /// `wait_before_reconnect` when `None`. Returns false when one is
    /// already scheduled or the stream is destroyed.
    pub fn reconnect(&self, delay: Option<Duration>) -> bool {
        let _span = self.inner.span.enter();
        let mut st = self.inner.state.lock();
        self.inner.reconnect_locked(&mut st, delay)
    }

    /// Cancel the in-flight attempt without destroying the stream.
    pub fn abort(&self) {
        let _span = self.inner.span.enter();
        self.inner.abort();
    }

    /// Tear everything down for good. Idempotent.
    pub fn destroy(&self) {
        let _span = self.inner.span.enter();
        self.inner.destroy();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Take the data feed. Only the first call gets it; chunks received
    /// before it is taken are counted but not buffered.
    pub fn take_data(&self) -> Option<DataStream> {
        let mut st = self.inner.state.lock();
        if st.data_taken {
            return None;
        }
        st.data_taken = true;
        let (tx, rx) = mpsc::channel(self.inner.policy.data_buffer());
        if !st.destroyed {
            st.data = Some(tx);
        }
        Some(ReceiverStream::new(rx))
    }

    pub fn id(&self) -> &StreamId {
        &self.inner.id
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn policy(&self) -> &Policy {
        &self.inner.policy
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle()
    }

    pub fn connected(&self) -> bool {
        self.inner.state.lock().phase() == Some(Phase::Connected)
    }

    pub fn connecting(&self) -> bool {
        self.inner.state.lock().phase() == Some(Phase::Connecting)
    }

    pub fn reconnecting(&self) -> bool {
        self.inner.state.lock().retry.is_pending()
    }

    pub fn destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Number of attempts issued so far.
    pub fn request_count(&self) -> u64 {
        self.inner.state.lock().stats.request_count
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.state.lock().stats.clone()
    }
}

impl Drop for PersistentStream {
    fn drop(&mut self) {
        let _span = self.inner.span.enter();
        self.inner.destroy();
    }
}

impl fmt::Debug for PersistentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStream")
            .field("id", &self.inner.id)
            .field("uri", &self.inner.uri)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

pub struct PersistentStreamBuilder {
    transport: Arc<dyn Transport>,
    request: RequestOptions,
    policy: Policy,
    id: Option<StreamId>,
}

impl PersistentStreamBuilder {
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn probe(mut self, probe: impl LivenessProbe) -> Self {
        self.policy.liveness_probe = Some(Arc::new(probe));
        self
    }

    pub fn id(mut self, id: StreamId) -> Self {
        self.id = Some(id);
        self
    }

    /// Validate the configuration and return an idle stream.
    pub fn build(self) -> Result<PersistentStream, ConfigError> {
        self.request.validate()?;

        let id = self.id.unwrap_or_default();
        let uri = self.request.uri();
        let span = info_span!("persistent_stream", id = %id, uri = %uri);
        let (events, _) = broadcast::channel(self.policy.event_capacity());

        Ok(PersistentStream {
            inner: Arc::new(Shared {
                id,
                uri,
                transport: self.transport,
                request: self.request,
                policy: self.policy,
                state: Mutex::new(State::new()),
                events,
                span,
            }),
        })
    }

    /// Build and connect straight away.
    pub fn open(self) -> Result<PersistentStream, ConfigError> {
        let stream = self.build()?;
        stream.connect();
        Ok(stream)
    }
}
