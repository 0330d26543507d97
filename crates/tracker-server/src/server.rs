//! `TrackerServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::counter;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracker_core::{NewWaypoint, Waypoint};
use tracker_telemetry::metrics as names;
use tracker_telemetry::PrometheusHandle;

use crate::auth::{AuthenticatedDevice, DeviceAuthenticator};
use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::error::ApiError;
use crate::health::{self, HealthResponse, StatsResponse};
use crate::hub::Hub;
use crate::service::WaypointService;
use crate::shutdown::ShutdownCoordinator;

/// Which browser origins may open viewer sockets and make CORS requests.
#[derive(Clone, Debug)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Empty list or `*` allows everything.
    pub fn allows_all(&self) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|o| o == "*")
    }

    /// A request without an `Origin` header only passes when all are allowed.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        if self.allows_all() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed.iter().any(|o| o == origin))
    }

    pub fn cors_layer(&self) -> CorsLayer {
        if self.allows_all() {
            return CorsLayer::permissive();
        }
        let origins: Vec<HeaderValue> = self
            .allowed
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid allowed origin");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::OPTIONS, Method::GET, Method::POST])
            .allow_headers([
                header::ACCEPT,
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                HeaderName::from_static("x-header-token"),
                HeaderName::from_static("x-header-device"),
            ])
            .expose_headers([header::LINK])
            .allow_credentials(true)
            .max_age(Duration::from_secs(300))
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub service: Arc<WaypointService>,
    pub authenticator: Arc<DeviceAuthenticator>,
    pub origins: Arc<OriginPolicy>,
    pub metrics: Option<PrometheusHandle>,
    pub max_frame_bytes: usize,
    pub start_time: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let origins = Arc::clone(&state.origins);
    let routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/ws/connect", get(ws_handler))
        .route("/api/v1/ws/stats", get(ws_stats_handler))
        .route("/api/v1/waypoint/list", get(list_waypoints))
        .route("/api/v1/waypoint/register", post(register_waypoints))
        .with_state(state);
    with_middleware(routes, &origins)
}

/// CORS, panic recovery (500 instead of a dropped connection) and tracing.
fn with_middleware(router: Router, origins: &OriginPolicy) -> Router {
    router
        .layer(origins.cors_layer())
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// The saint-tracker server.
pub struct TrackerServer {
    config: ServerConfig,
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl TrackerServer {
    pub fn new(
        config: ServerConfig,
        hub: Arc<Hub>,
        service: Arc<WaypointService>,
        authenticator: Arc<DeviceAuthenticator>,
    ) -> Self {
        let state = AppState {
            hub,
            service,
            authenticator,
            origins: Arc::new(OriginPolicy::new(config.allowed_origins.clone())),
            metrics: None,
            max_frame_bytes: config.max_frame_bytes,
            start_time: Instant::now(),
        };
        Self {
            config,
            state,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Serve `/metrics` from this recorder handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.state.hub
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener and serve in a background task.
    pub async fn listen(self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });
        info!(%addr, "listening");

        Ok(ServerHandle {
            addr,
            hub: Arc::clone(&self.state.hub),
            shutdown: self.shutdown,
            task,
            timeout: self.config.shutdown_timeout,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    task: JoinHandle<()>,
    timeout: Duration,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Close every viewer, stop accepting, and wait for the listener and hub
    /// loop within the configured timeout.
    pub async fn shutdown(self) {
        self.hub.shutdown();
        let hub = Arc::clone(&self.hub);
        let hub_loop = tokio::spawn(async move { hub.join().await });
        self.shutdown
            .graceful_shutdown(vec![self.task, hub_loop], self.timeout)
            .await;
        info!("server stopped");
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => tracker_telemetry::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /api/v1/ws/stats
async fn ws_stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(health::ws_stats(
        state.hub.connection_count(),
        state.hub.state(),
    ))
}

/// GET /api/v1/ws/connect
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.origins.allows(origin) {
        counter!(names::WS_UPGRADES_REJECTED_TOTAL).increment(1);
        warn!(origin = origin.unwrap_or_default(), "websocket origin rejected");
        return ApiError::forbidden("origin not allowed").into_response();
    }
    if !state.hub.is_running() {
        counter!(names::WS_UPGRADES_REJECTED_TOTAL).increment(1);
        debug!(state = state.hub.state().as_str(), "websocket upgrade refused, hub not running");
        return ApiError::unavailable("hub is shutting down").into_response();
    }

    let max_frame_bytes = state.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let hub = state.hub;
            let (conn, mailbox) = hub.open_connection();
            let _ = hub.admit(Arc::clone(&conn));
            serve_connection(socket, conn, mailbox, hub, max_frame_bytes).await;
        })
}

/// GET /api/v1/waypoint/list
async fn list_waypoints(State(state): State<AppState>) -> Result<Json<Vec<Waypoint>>, ApiError> {
    Ok(Json(state.service.list()?))
}

/// POST /api/v1/waypoint/register
///
/// Accepts one object or a non-empty array and answers in the same shape.
async fn register_waypoints(
    AuthenticatedDevice(device_id): AuthenticatedDevice,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (batch, single) = parse_register_body(&body)?;
    let created = state.service.register(batch)?;
    debug!(device_id = %device_id, count = created.len(), "register accepted");

    Ok(match (single, created.as_slice()) {
        (true, [one]) => (StatusCode::CREATED, Json(one)).into_response(),
        _ => (StatusCode::CREATED, Json(&created)).into_response(),
    })
}

/// Returns the batch and whether it was sent as a single object.
fn parse_register_body(body: &[u8]) -> Result<(Vec<NewWaypoint>, bool), ApiError> {
    let invalid = |detail: String| ApiError::invalid_argument("Invalid JSON body").with_detail(detail);

    let value: Value = serde_json::from_slice(body).map_err(|e| invalid(e.to_string()))?;
    match value {
        Value::Array(items) if !items.is_empty() => {
            let mut batch = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let waypoint = serde_json::from_value(item).map_err(|e| {
                    ApiError::invalid_argument(format!("Invalid JSON body for item {index}"))
                        .with_detail(format!("Item {index}: {e}"))
                })?;
                batch.push(waypoint);
            }
            Ok((batch, false))
        }
        Value::Object(map) => {
            let waypoint = serde_json::from_value(Value::Object(map))
                .map_err(|e| invalid(e.to_string()))?;
            Ok((vec![waypoint], true))
        }
        _ => Err(invalid("expected a waypoint object or a non-empty array".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use tracker_store::{Database, DeviceRepo, WaypointRepo};

    use crate::auth::{DEVICE_HEADER, TOKEN_HEADER};
    use crate::auth_cache::DeviceAuthCache;
    use crate::config::HubConfig;

    struct Fixture {
        server: TrackerServer,
        devices: DeviceRepo,
    }

    fn fixture(origins: Vec<String>) -> Fixture {
        let db = Database::in_memory().unwrap();
        let devices = DeviceRepo::new(db.clone());
        let hub = Hub::start(HubConfig::default());
        let service = Arc::new(WaypointService::new(
            Arc::new(WaypointRepo::new(db)),
            hub.clone(),
        ));
        let cache = Arc::new(DeviceAuthCache::start(
            Duration::from_secs(60),
            Duration::from_secs(300),
        ));
        let authenticator = Arc::new(DeviceAuthenticator::new(cache, Arc::new(devices.clone())));
        let config = ServerConfig {
            allowed_origins: origins,
            ..ServerConfig::default()
        };
        Fixture {
            server: TrackerServer::new(config, hub, service, authenticator),
            devices,
        }
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn register_request(body: &str, device: Option<&str>, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/waypoint/register")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(device) = device {
            builder = builder.header(DEVICE_HEADER, device);
        }
        if let Some(token) = token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    const ONE: &str = r#"{"latitude":41.9,"longitude":12.5,"speed":30,"created_at":1700000000}"#;

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = fixture(Vec::new()).server.router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn ws_stats_reports_clients() {
        let app = fixture(Vec::new()).server.router();
        let req = Request::builder().uri("/api/v1/ws/stats").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({"connected_clients": 0, "status": "active"})
        );
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let app = fixture(Vec::new()).server.router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn register_requires_token() {
        let app = fixture(Vec::new()).server.router();
        let resp = app
            .oneshot(register_request(ONE, Some("ESP-001"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["code"], "unauthenticated");
        assert_eq!(json["message"], "X-Header-Token missing");
    }

    #[tokio::test]
    async fn register_rejects_unknown_device_and_bad_token() {
        let fx = fixture(Vec::new());
        fx.devices.register("ESP-001", "s3cret", None).unwrap();
        let app = fx.server.router();

        let resp = app
            .clone()
            .oneshot(register_request(ONE, Some("ESP-999"), Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["message"], "esp32 device not valid");

        let resp = app
            .oneshot(register_request(ONE, Some("ESP-001"), Some("wrong")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "Invalid token for device");
    }

    #[tokio::test]
    async fn register_single_returns_object_then_lists() {
        let fx = fixture(Vec::new());
        fx.devices.register("ESP-001", "s3cret", None).unwrap();
        let app = fx.server.router();

        let resp = app
            .clone()
            .oneshot(register_request(ONE, Some("ESP-001"), Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert!(created.is_object());
        assert_eq!(created["speed"], 30);
        assert_eq!(created["created_at"], "2023-11-14T22:13:20Z");

        let req = Request::builder().uri("/api/v1/waypoint/list").body(Body::empty()).unwrap();
        let listed = body_json(app.oneshot(req).await.unwrap()).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["id"], created["id"]);
    }

    #[tokio::test]
    async fn register_array_returns_array() {
        let fx = fixture(Vec::new());
        fx.devices.register("ESP-001", "s3cret", None).unwrap();
        let body = format!("[{ONE},{ONE}]");
        let resp = fx
            .server
            .router()
            .oneshot(register_request(&body, Some("ESP-001"), Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn register_reports_invalid_item() {
        let fx = fixture(Vec::new());
        fx.devices.register("ESP-001", "s3cret", None).unwrap();
        let body = format!(r#"[{ONE},{{"latitude":95.0,"longitude":12.5,"created_at":1700000000}}]"#);
        let resp = fx
            .server
            .router()
            .oneshot(register_request(&body, Some("ESP-001"), Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["code"], "invalid_argument");
        assert_eq!(json["message"], "Invalid JSON body for item 1");
        assert_eq!(json["details"][0], "Item 1: latitude: must be no greater than 90");
    }

    #[test]
    fn parse_body_shapes() {
        let (batch, single) = parse_register_body(ONE.as_bytes()).unwrap();
        assert!(single);
        assert_eq!(batch.len(), 1);

        let (batch, single) = parse_register_body(format!("[{ONE}]").as_bytes()).unwrap();
        assert!(!single);
        assert_eq!(batch.len(), 1);

        assert_eq!(parse_register_body(b"[]").unwrap_err().message, "Invalid JSON body");
        assert_eq!(parse_register_body(b"42").unwrap_err().message, "Invalid JSON body");
        assert_eq!(parse_register_body(b"{").unwrap_err().message, "Invalid JSON body");
        assert_eq!(
            parse_register_body(br#"[{"latitude":"north"}]"#).unwrap_err().message,
            "Invalid JSON body for item 0"
        );
    }

    #[test]
    fn origin_policy() {
        let open = OriginPolicy::new(Vec::new());
        assert!(open.allows(None));
        assert!(open.allows(Some("http://anything")));

        let star = OriginPolicy::new(vec!["http://a.test".into(), "*".into()]);
        assert!(star.allows(Some("http://b.test")));

        let strict = OriginPolicy::new(vec!["http://a.test".into()]);
        assert!(strict.allows(Some("http://a.test")));
        assert!(!strict.allows(Some("http://b.test")));
        assert!(!strict.allows(None));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        async fn boom() -> &'static str {
            panic!("handler bug")
        }
        let app = with_middleware(
            Router::new().route("/boom", get(boom)),
            &OriginPolicy::new(Vec::new()),
        );
        let req = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // The service keeps answering after the panic.
        let req = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        assert_eq!(
            app.oneshot(req).await.unwrap().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = fixture(Vec::new()).server.router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
