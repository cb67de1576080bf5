#![allow(dead_code)]

//! Scriptable HTTP backend for exercising the route probing against a real socket.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
pub enum Reply {
    Json(StatusCode, Value),
    Text(StatusCode, String),
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Reply::Json(StatusCode::OK, value)
    }

    pub fn detail(status: StatusCode, detail: &str) -> Self {
        Reply::Json(status, json!({ "detail": detail }))
    }

    pub fn not_found() -> Self {
        Reply::detail(StatusCode::NOT_FOUND, "Not Found")
    }
}

/// One request as the backend saw it.
#[derive(Debug, Clone)]
pub struct Hit {
    /// `"METHOD /path"` with `?query` appended when present.
    pub key: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct BackendInner {
    replies: HashMap<String, (Reply, Option<Duration>)>,
    hits: Vec<Hit>,
}

#[derive(Clone)]
pub struct FakeBackend {
    pub url: String,
    inner: Arc<Mutex<BackendInner>>,
}

impl FakeBackend {
    pub async fn spawn() -> Self {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake backend");
        let addr = listener.local_addr().expect("fake backend addr");
        let inner = Arc::new(Mutex::new(BackendInner::default()));
        let app = Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&inner));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            url: format!("http://{addr}"),
            inner,
        }
    }

    pub async fn on(&self, key: &str, reply: Reply) {
        self.inner
            .lock()
            .await
            .replies
            .insert(key.to_string(), (reply, None));
    }

    pub async fn on_delayed(&self, key: &str, reply: Reply, delay: Duration) {
        self.inner
            .lock()
            .await
            .replies
            .insert(key.to_string(), (reply, Some(delay)));
    }

    pub async fn remove(&self, key: &str) {
        self.inner.lock().await.replies.remove(key);
    }

    pub async fn hits(&self) -> Vec<Hit> {
        self.inner.lock().await.hits.clone()
    }

    pub async fn hit_keys(&self) -> Vec<String> {
        self.hits().await.into_iter().map(|hit| hit.key).collect()
    }

    pub async fn count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .await
            .hits
            .iter()
            .filter(|hit| hit.key == key)
            .count()
    }

    pub async fn clear_hits(&self) {
        self.inner.lock().await.hits.clear();
    }
}

async fn dispatch(
    State(inner): State<Arc<Mutex<BackendInner>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = match uri.query() {
        Some(query) => format!("{method} {}?{query}", uri.path()),
        None => format!("{method} {}", uri.path()),
    };
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice::<Value>(&body).ok();

    let scripted = {
        let mut inner = inner.lock().await;
        inner.hits.push(Hit {
            key: key.clone(),
            authorization,
            body,
        });
        inner.replies.get(&key).cloned()
    };

    let (reply, delay) = scripted.unwrap_or((Reply::not_found(), None));
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match reply {
        Reply::Json(status, value) => (status, Json(value)).into_response(),
        Reply::Text(status, text) => (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
    }
}
