// In-process stand-in for QuestDB's HTTP endpoints.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Extension, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use questdb_client::Config;
use tokio::sync::broadcast;

pub const SAMPLE_RESPONSE: &str = r#"{
    "query": "SELECT * FROM test_table",
    "columns": [
        {"name": "number", "type": "LONG"},
        {"name": "complex", "type": "DOUBLE"},
        {"name": "string", "type": "VARCHAR"},
        {"name": "tf", "type": "BOOLEAN"},
        {"name": "some_symbol", "type": "SYMBOL"},
        {"name": "timestamp", "type": "TIMESTAMP"}
    ],
    "timestamp": 5,
    "dataset": [
        [15, 3.14159, "hello", true, "AAPL", "2023-08-14T12:00:00.000000Z"]
    ],
    "count": 1
}"#;

#[derive(Default)]
pub struct MockState {
    pub writes: Mutex<Vec<String>>,
    pub queries: Mutex<Vec<String>>,
    pub auth: Mutex<Vec<Option<String>>>,
    /// Number of upcoming writes to reject with HTTP 500.
    pub fail_writes: AtomicUsize,
}

impl MockState {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

pub struct MockQuestDb {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    shutdown: broadcast::Sender<()>,
}

impl MockQuestDb {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/write", post(write_handler))
            .route("/exec", get(exec_handler))
            .layer(Extension(state.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, _) = broadcast::channel::<()>(1);
        let mut shutdown_sub = shutdown.subscribe();
        tokio::spawn(async move {
            let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_sub.recv().await;
            });
            if let Err(e) = graceful.await {
                eprintln!("mock server error: {}", e);
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn config(&self) -> Config {
        Config::http(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

fn auth_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn write_handler(
    Extension(state): Extension<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    state.auth.lock().unwrap().push(auth_of(&headers));
    assert_eq!(params.get("precision").map(String::as_str), Some("n"));

    let failing = state
        .fail_writes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"code":"internal error","message":"simulated failure","line":1}"#.to_string(),
        );
    }

    state.writes.lock().unwrap().push(body);
    (StatusCode::NO_CONTENT, String::new())
}

async fn exec_handler(
    Extension(state): Extension<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.auth.lock().unwrap().push(auth_of(&headers));
    let sql = params.get("query").cloned().unwrap_or_default();
    state.queries.lock().unwrap().push(sql.clone());

    if sql.starts_with("selec ") {
        let body = serde_json::json!({
            "query": sql,
            "error": "unexpected token [selec]",
            "position": 0
        });
        return (StatusCode::BAD_REQUEST, body.to_string());
    }
    (StatusCode::OK, SAMPLE_RESPONSE.to_string())
}
