use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_OK: &str = "/ok";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_FLAKY: &str = "/flaky";
pub const PATH_SESSION: &str = "/api/session";
pub const PATH_CHAT: &str = "/api/chat";
pub const PATH_CHAT_BUSY: &str = "/api/chat-busy";

/// Business code the mock API returns on success.
pub const CODE_OK: &str = "20000";
pub const CODE_BUSY: &str = "50001";

const DEFAULT_SLOW_MS: u64 = 50;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    sessions_created: Arc<AtomicU64>,
    chats_total: Arc<AtomicU64>,
    flaky_total: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    pub fn chats_total(&self) -> u64 {
        self.chats_total.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub ok: String,
    pub slow: String,
    pub flaky: String,
    pub session: String,
    pub chat: String,
    pub chat_busy: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            ok: format!("{base_url}{PATH_OK}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            flaky: format!("{base_url}{PATH_FLAKY}"),
            session: format!("{base_url}{PATH_SESSION}"),
            chat: format!("{base_url}{PATH_CHAT}"),
            chat_busy: format!("{base_url}{PATH_CHAT_BUSY}"),
            base_url,
        }
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }

    pub fn slow_ms(&self, ms: u64) -> String {
        format!("{}?ms={ms}", self.slow)
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    code: &'static str,
    message: &'static str,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct SessionData {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ChatData {
    reply: &'static str,
}

async fn handle_ok(State(stats): State<TestServerStats>) -> &'static str {
    stats.inc_requests_total();
    "ok"
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    stats.inc_requests_total();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_SLOW_MS);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn handle_status(State(stats): State<TestServerStats>, Path(code): Path<u16>) -> StatusCode {
    stats.inc_requests_total();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

// Every other request fails.
async fn handle_flaky(State(stats): State<TestServerStats>) -> StatusCode {
    stats.inc_requests_total();
    let n = stats.flaky_total.fetch_add(1, Ordering::Relaxed);
    if n % 2 == 0 {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn handle_session(
    State(stats): State<TestServerStats>,
) -> Json<ApiResponse<SessionData>> {
    stats.inc_requests_total();
    let n = stats.sessions_created.fetch_add(1, Ordering::Relaxed);
    Json(ApiResponse {
        code: CODE_OK,
        message: "success",
        data: Some(SessionData {
            session_id: format!("session-{n}"),
        }),
    })
}

async fn handle_chat(State(stats): State<TestServerStats>) -> Json<ApiResponse<ChatData>> {
    stats.inc_requests_total();
    stats.chats_total.fetch_add(1, Ordering::Relaxed);
    Json(ApiResponse {
        code: CODE_OK,
        message: "success",
        data: Some(ChatData { reply: "hello" }),
    })
}

// HTTP 200 with a failing business code.
async fn handle_chat_busy(State(stats): State<TestServerStats>) -> Json<ApiResponse<ChatData>> {
    stats.inc_requests_total();
    stats.chats_total.fetch_add(1, Ordering::Relaxed);
    Json(ApiResponse {
        code: CODE_BUSY,
        message: "model busy",
        data: None,
    })
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_OK, get(handle_ok))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_STATUS, get(handle_status))
        .route(PATH_FLAKY, get(handle_flaky))
        .route(PATH_SESSION, post(handle_session))
        .route(PATH_CHAT, post(handle_chat))
        .route(PATH_CHAT_BUSY, post(handle_chat_busy))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        let base_url = format!("http://{addr}");
        let urls = TestServerUrls::new(base_url.clone());

        Ok(Self {
            addr,
            base_url,
            urls,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
