//! Runs one [`RelaySession`] against its two legs.
//!
//! Everything a session reacts to (client frames, dial completion, upstream
//! frames, the close deadline, shutdown) is multiplexed in one task, so the
//! state machine and its pending queue are never shared.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use futures::{SinkExt, StreamExt, future};
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, instrument, warn};
use wsrelay_core::{Payload, SessionId, classify};

use super::RelayLimits;
use super::close::CloseInfo;
use super::frame::{Frame, FrameSink, FrameStream, Leg, Outbound};
use super::state::{Action, Event, RelaySession};
use crate::error::{RelayError, Result};
use crate::metrics::{
    DIRECTION_CLIENT, DIRECTION_UPSTREAM, MESSAGES_TOTAL, PENDING_OVERFLOW_TOTAL,
    SESSION_DURATION_SECONDS, SESSIONS_REJECTED_TOTAL, UPSTREAM_ERRORS_TOTAL,
};
use crate::upstream::UpstreamConnector;

/// Upper bound on flushing close frames once the session is over.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a session needs besides the client leg.
pub struct SessionSetup {
    /// Correlation ID for logs.
    pub id: SessionId,
    /// Header strategy outcome. An error rejects the session before dialing.
    pub upstream_headers: Result<HeaderMap>,
    /// Dials the upstream leg.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Queue and timeout limits.
    pub limits: RelayLimits,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Summary returned when a session ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Payloads forwarded client to upstream.
    pub to_upstream: u64,
    /// Payloads forwarded upstream to client.
    pub to_client: u64,
    /// Client payloads dropped on overflow.
    pub dropped: u64,
    /// Whether the session was refused before dialing.
    pub rejected: bool,
    /// Whether the close handshake timed out.
    pub timed_out: bool,
    /// Whether the relay sent the client a close frame.
    pub client_closed: bool,
    /// Status of that close frame (`None` for a bare close).
    pub client_close: Option<CloseInfo>,
}

/// What woke the session loop.
enum Wake {
    Shutdown,
    Client(Option<Result<Frame>>),
    Dialed(Result<Leg>),
    Upstream(Option<Result<Frame>>),
    Deadline,
}

struct Driver {
    session: RelaySession,
    client_sink: FrameSink,
    client_stream: Option<FrameStream>,
    upstream_sink: Option<FrameSink>,
    upstream_stream: Option<FrameStream>,
    dial: Option<JoinHandle<Result<Leg>>>,
    headers: Option<HeaderMap>,
    connector: Arc<dyn UpstreamConnector>,
    close_timeout: Duration,
    deadline: Option<Instant>,
    report: SessionReport,
}

/// Relay between `client` and a freshly dialed upstream until both close.
#[instrument(skip_all, fields(session_id = %setup.id))]
pub async fn run_session(client: Leg, setup: SessionSetup) -> SessionReport {
    let started = Instant::now();
    let SessionSetup {
        id: _,
        upstream_headers,
        connector,
        limits,
        shutdown,
    } = setup;

    let mut driver = Driver {
        session: RelaySession::new(limits.queue()),
        client_sink: client.sink,
        client_stream: Some(client.stream),
        upstream_sink: None,
        upstream_stream: None,
        dial: None,
        headers: None,
        connector,
        close_timeout: limits.close_timeout,
        deadline: None,
        report: SessionReport::default(),
    };

    let first = match upstream_headers {
        Ok(headers) => {
            driver.headers = Some(headers);
            Event::Start
        }
        Err(err) => {
            warn!(error = %err, "session rejected before dialing");
            driver.report.rejected = true;
            counter!(SESSIONS_REJECTED_TOTAL, "reason" => "credential").increment(1);
            Event::Reject(err.close_info())
        }
    };
    driver.dispatch(first).await;

    let mut shutdown_seen = false;
    while !driver.session.is_closed() {
        if driver.session.is_closing() && driver.deadline.is_none() {
            driver.deadline = Some(Instant::now() + driver.close_timeout);
        }

        let wake = tokio::select! {
            () = shutdown.cancelled(), if !shutdown_seen => Wake::Shutdown,
            item = next_frame(&mut driver.client_stream) => Wake::Client(item),
            result = join_dial(&mut driver.dial) => Wake::Dialed(result),
            item = next_frame(&mut driver.upstream_stream) => Wake::Upstream(item),
            () = sleep_until(driver.deadline) => Wake::Deadline,
        };

        let event = match wake {
            Wake::Shutdown => {
                shutdown_seen = true;
                Event::Shutdown
            }
            Wake::Client(item) => match driver.client_event(item) {
                Some(event) => event,
                None => continue,
            },
            Wake::Dialed(Ok(leg)) => {
                driver.upstream_sink = Some(leg.sink);
                driver.upstream_stream = Some(leg.stream);
                Event::UpstreamOpened
            }
            Wake::Dialed(Err(err)) => {
                counter!(UPSTREAM_ERRORS_TOTAL).increment(1);
                Event::UpstreamError(err.to_string())
            }
            Wake::Upstream(item) => match driver.upstream_event(item) {
                Some(event) => event,
                None => continue,
            },
            Wake::Deadline => {
                driver.report.timed_out = true;
                Event::CloseTimeout
            }
        };
        driver.dispatch(event).await;
    }

    driver.finish().await;

    let dropped = driver.session.dropped();
    if dropped > 0 {
        counter!(PENDING_OVERFLOW_TOTAL, "policy" => "dropNewest").increment(dropped);
    }
    if driver.session.closed_on_overflow() {
        counter!(PENDING_OVERFLOW_TOTAL, "policy" => "closeSession").increment(1);
    }
    driver.report.dropped = dropped;
    histogram!(SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        to_upstream = driver.report.to_upstream,
        to_client = driver.report.to_client,
        dropped,
        "session closed"
    );
    driver.report
}

impl Driver {
    fn client_event(&mut self, item: Option<Result<Frame>>) -> Option<Event> {
        match item {
            Some(Ok(Frame::Data(payload))) => Some(Event::ClientMessage(payload)),
            Some(Ok(Frame::Close(info))) => {
                debug!(?info, "client sent close");
                Some(Event::ClientClosed(info))
            }
            Some(Ok(Frame::Control)) => None,
            Some(Err(err)) => {
                self.client_stream = None;
                Some(Event::ClientError(err.to_string()))
            }
            None => {
                self.client_stream = None;
                Some(Event::ClientClosed(None))
            }
        }
    }

    fn upstream_event(&mut self, item: Option<Result<Frame>>) -> Option<Event> {
        match item {
            Some(Ok(Frame::Data(payload))) => Some(Event::UpstreamMessage(payload)),
            Some(Ok(Frame::Close(info))) => {
                debug!(?info, "upstream sent close");
                Some(Event::UpstreamClosed(info))
            }
            Some(Ok(Frame::Control)) => None,
            Some(Err(err)) => {
                self.upstream_stream = None;
                counter!(UPSTREAM_ERRORS_TOTAL).increment(1);
                Some(Event::UpstreamError(err.to_string()))
            }
            None => {
                self.upstream_stream = None;
                Some(Event::UpstreamClosed(None))
            }
        }
    }

    /// Feed `event` to the state machine and carry out its actions.
    ///
    /// A failed send becomes a follow-up error event, handled after the
    /// remaining actions of the current batch.
    async fn dispatch(&mut self, event: Event) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            for action in self.session.handle(event) {
                if let Some(follow_up) = self.perform(action).await {
                    events.push_back(follow_up);
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Dial => {
                let Some(headers) = self.headers.take() else {
                    return Some(Event::UpstreamError("dial requested twice".into()));
                };
                debug!("dialing upstream");
                let connector = Arc::clone(&self.connector);
                self.dial = Some(tokio::spawn(async move { connector.connect(headers).await }));
                None
            }
            Action::CancelDial => {
                let Some(dial) = self.dial.take() else {
                    return Some(Event::DialAborted);
                };
                debug!("cancelling upstream dial");
                dial.abort();
                // A dial that already finished still hands back its leg.
                match dial.await {
                    Ok(Ok(leg)) => {
                        self.upstream_sink = Some(leg.sink);
                        self.upstream_stream = Some(leg.stream);
                        Some(Event::UpstreamOpened)
                    }
                    Ok(Err(err)) => Some(Event::UpstreamError(err.to_string())),
                    Err(err) if err.is_cancelled() => Some(Event::DialAborted),
                    Err(err) => Some(Event::UpstreamError(format!("dial task failed: {err}"))),
                }
            }
            Action::SendUpstream(payload) => {
                let sink = self.upstream_sink.as_mut()?;
                log_payload(DIRECTION_UPSTREAM, &payload);
                match sink.send(Outbound::Data(payload)).await {
                    Ok(()) => {
                        self.report.to_upstream += 1;
                        counter!(MESSAGES_TOTAL, "direction" => DIRECTION_UPSTREAM).increment(1);
                        None
                    }
                    Err(err) => {
                        counter!(UPSTREAM_ERRORS_TOTAL).increment(1);
                        Some(Event::UpstreamError(err.to_string()))
                    }
                }
            }
            Action::SendClient(payload) => {
                log_payload(DIRECTION_CLIENT, &payload);
                match self.client_sink.send(Outbound::Data(payload)).await {
                    Ok(()) => {
                        self.report.to_client += 1;
                        counter!(MESSAGES_TOTAL, "direction" => DIRECTION_CLIENT).increment(1);
                        None
                    }
                    Err(err) => Some(Event::ClientError(err.to_string())),
                }
            }
            Action::CloseClient(info) => {
                match &info {
                    Some(close) => info!(code = close.code, reason = %close.reason, "closing client"),
                    None => info!("closing client without status"),
                }
                self.report.client_closed = true;
                self.report.client_close.clone_from(&info);
                self.client_sink
                    .send(Outbound::Close(info))
                    .await
                    .err()
                    .map(|err| Event::ClientError(err.to_string()))
            }
            Action::CloseUpstream(info) => {
                let sink = self.upstream_sink.as_mut()?;
                match &info {
                    Some(close) => debug!(code = close.code, reason = %close.reason, "closing upstream"),
                    None => debug!("closing upstream without status"),
                }
                sink.send(Outbound::Close(info))
                    .await
                    .err()
                    .map(|err| Event::UpstreamError(err.to_string()))
            }
        }
    }

    /// Abort any dial still running and flush pending close replies.
    async fn finish(&mut self) {
        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
        let flush = async {
            let _ = self.client_sink.close().await;
            if let Some(sink) = self.upstream_sink.as_mut() {
                let _ = sink.close().await;
            }
        };
        let _ = tokio::time::timeout(FLUSH_TIMEOUT, flush).await;
    }
}

fn log_payload(direction: &'static str, payload: &Payload) {
    if tracing::enabled!(Level::DEBUG) {
        let kind = classify(payload);
        debug!(direction, kind = kind.label(), len = payload.len(), "relaying message");
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<Frame>> {
    match stream {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}

async fn join_dial(dial: &mut Option<JoinHandle<Result<Leg>>>) -> Result<Leg> {
    let Some(handle) = dial.as_mut() else {
        return future::pending().await;
    };
    let joined = handle.await;
    *dial = None;
    joined.unwrap_or_else(|e| Err(RelayError::Upstream(format!("dial task failed: {e}"))))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
