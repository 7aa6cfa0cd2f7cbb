//! `RelayServer`: Axum HTTP + `WebSocket` listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use wsrelay_core::SessionId;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::health::{self, HealthResponse};
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_REJECTED_TOTAL, SESSIONS_TOTAL};
use crate::origin::OriginPolicy;
use crate::relay::{Leg, RelayLimits, SessionSetup, run_session};
use crate::shutdown::ShutdownCoordinator;
use crate::upstream::{
    ClientRequest, HeaderStrategy, TungsteniteConnector, UpstreamConnector, strategy_from_settings,
};

/// Body of the plain-HTTP response on the relay path.
const BANNER: &str = "WebSocket relay";

/// Live session counts shared by every handler.
#[derive(Debug, Default)]
pub struct SessionCounters {
    active: AtomicUsize,
    total: AtomicU64,
}

impl SessionCounters {
    /// Sessions currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions accepted since startup.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Reserve a slot if fewer than `max` sessions are running.
    pub fn try_acquire(self: &Arc<Self>, max: usize) -> Option<SessionGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        let _ = self.total.fetch_add(1, Ordering::Relaxed);
        counter!(SESSIONS_TOTAL).increment(1);
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        Some(SessionGuard {
            counters: Arc::clone(self),
        })
    }
}

/// Holds one session slot; released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    counters: Arc<SessionCounters>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.counters.active.fetch_sub(1, Ordering::AcqRel);
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session cap.
    pub max_sessions: usize,
    /// Allowed origins.
    pub origins: Arc<OriginPolicy>,
    /// Upstream header strategy.
    pub strategy: Arc<dyn HeaderStrategy>,
    /// Upstream dialer.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Per-session limits.
    pub limits: RelayLimits,
    /// Session counters.
    pub counters: Arc<SessionCounters>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    strategy: Arc<dyn HeaderStrategy>,
    connector: Arc<dyn UpstreamConnector>,
    counters: Arc<SessionCounters>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server dialing `config.target_url`.
    pub fn new(config: ServerConfig) -> Self {
        let strategy = strategy_from_settings(&config.auth);
        let connector = Arc::new(TungsteniteConnector::new(
            config.target_url.clone(),
            config.connect_timeout(),
        ));
        Self {
            config,
            strategy,
            connector,
            counters: Arc::new(SessionCounters::default()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Replace the upstream connector.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn UpstreamConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace the header strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn HeaderStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            max_sessions: self.config.max_sessions,
            origins: Arc::new(OriginPolicy::new(&self.config.allowed_origins)),
            strategy: Arc::clone(&self.strategy),
            connector: Arc::clone(&self.connector),
            limits: self.config.relay_limits(),
            counters: Arc::clone(&self.counters),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(relay_handler)
            .with_state(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until shutdown.
    pub async fn listen(&self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(
            %addr,
            target = %self.config.target_url,
            strategy = self.strategy.name(),
            "relay server listening"
        );

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        });

        Ok(ServerHandle {
            addr,
            task,
            shutdown: Arc::clone(&self.shutdown),
        })
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the session counters.
    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle to a running listener.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<std::io::Result<()>>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, close every session with 1001, and wait for them.
    ///
    /// Returns `false` if sessions were still running after `timeout`.
    pub async fn shutdown(self, timeout: Option<Duration>) -> bool {
        let drained = self.shutdown.graceful_shutdown(timeout).await;
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "listener exited with error"),
            Err(err) => warn!(error = %err, "listener task failed"),
        }
        info!(drained, "relay server stopped");
        drained
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.counters.active(),
        state.counters.total(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Any other path: upgrade into a relay session, or answer with the banner.
async fn relay_handler(
    State(state): State<AppState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Ok(ws) = ws else {
        return banner();
    };

    let request = ClientRequest::new(query, headers);
    if !state.origins.allows(request.origin()) {
        warn!(origin = ?request.origin(), "upgrade refused: origin not allowed");
        counter!(SESSIONS_REJECTED_TOTAL, "reason" => "origin").increment(1);
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }
    if state.shutdown.is_shutting_down() {
        counter!(SESSIONS_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down").into_response();
    }
    let Some(guard) = state.counters.try_acquire(state.max_sessions) else {
        warn!(max = state.max_sessions, "upgrade refused: session limit reached");
        counter!(SESSIONS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many sessions").into_response();
    };

    let id = SessionId::new();
    info!(session_id = %id, origin = ?request.origin(), "client connected");
    let setup = SessionSetup {
        id,
        upstream_headers: state.strategy.upstream_headers(&request),
        connector: Arc::clone(&state.connector),
        limits: state.limits,
        shutdown: state.shutdown.token(),
    };
    let tracker = state.shutdown.tracker().clone();

    ws.on_failed_upgrade(|err| warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            tracker.track_future(async move {
                let _slot = guard;
                let report = run_session(Leg::from_axum(socket), setup).await;
                debug!(?report, "session report");
            })
        })
}

fn banner() -> Response {
    (
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        ],
        BANNER,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        RelayServer::new(ServerConfig::default())
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.counters().active(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["active_sessions"], 0);
        assert_eq!(parsed["sessions_total"], 0);
    }

    #[tokio::test]
    async fn metrics_404_without_recorder() {
        let app = make_server().router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rendered_with_handle() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            counter!(SESSIONS_TOTAL).increment(4);
        });

        let app = make_server().with_metrics(handle).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("relay_sessions_total 4"));
    }

    #[tokio::test]
    async fn plain_request_gets_banner_with_cors() {
        let app = make_server().router();
        let req = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers().clone();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, OPTIONS");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "*");
        assert_eq!(body_string(resp).await, "WebSocket relay");
    }

    #[tokio::test]
    async fn post_gets_banner() {
        let app = make_server().router();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, BANNER);
    }

    #[tokio::test]
    async fn preflight_is_answered() {
        let app = make_server().router();
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .header("origin", "https://app.example")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn counters_enforce_cap() {
        let counters = Arc::new(SessionCounters::default());
        let first = counters.try_acquire(2).unwrap();
        let second = counters.try_acquire(2).unwrap();
        assert!(counters.try_acquire(2).is_none());
        assert_eq!(counters.active(), 2);

        drop(first);
        assert_eq!(counters.active(), 1);
        let _third = counters.try_acquire(2).unwrap();
        drop(second);
        assert_eq!(counters.active(), 1);
        assert_eq!(counters.total(), 3);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let handle = server.listen().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.shutdown(Some(Duration::from_secs(1))).await);
    }
}
