#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::Json,
    http::{Method, Request, StatusCode, header},
    routing::post,
};
use pollsync::config::Config;
use pollsync::db::MemoryPollStore;
use pollsync::polls::{USER_ID_KEY, USERNAME_KEY};
use pollsync::startup::AppState;
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::{MemoryStore, Session, SessionManagerLayer};
use uuid::Uuid;

#[derive(Deserialize)]
struct LoginRequest {
    id: Uuid,
    name: String,
}

// Stands in for the authentication layer: writes the identity into the session.
async fn login(session: Session, Json(body): Json<LoginRequest>) -> StatusCode {
    session.insert(USER_ID_KEY, body.id).await.expect("insert user id");
    session.insert(USERNAME_KEY, body.name).await.expect("insert username");
    StatusCode::NO_CONTENT
}

#[derive(Clone)]
pub struct TestApp {
    pub state: AppState<MemoryPollStore>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let state = AppState::new(MemoryPollStore::new(), &config);
        let router = pollsync::router(state.clone())
            .route("/test/login", post(login))
            .layer(SessionManagerLayer::new(MemoryStore::default()).with_secure(false));
        TestApp { state, router }
    }

    /// A client with no session yet.
    pub fn anonymous(&self) -> TestClient {
        TestClient {
            router: self.router.clone(),
            cookie: None,
            user_id: None,
        }
    }

    pub async fn user(&self, name: &str) -> TestClient {
        let mut client = self.anonymous();
        let id = Uuid::new_v4();
        let (status, _) = client
            .send(
                Method::POST,
                "/test/login",
                Some(serde_json::json!({"id": id, "name": name})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        client.user_id = Some(id);
        client
    }
}

pub struct TestClient {
    router: Router,
    cookie: Option<String>,
    pub user_id: Option<Uuid>,
}

impl TestClient {
    pub fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    pub async fn send(&mut self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = self.request(method, uri, body);
        let response = self.router.clone().oneshot(request).await.expect("response");

        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie
                .to_str()
                .expect("ascii cookie")
                .split(';')
                .next()
                .unwrap_or_default()
                .to_string();
            self.cookie = Some(pair);
        }

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    /// Sends without reading the body, for streaming responses.
    pub async fn open(&self, uri: &str) -> axum::response::Response {
        let request = self.request(Method::GET, uri, None);
        self.router.clone().oneshot(request).await.expect("response")
    }

    pub async fn get(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body)).await
    }

    pub async fn patch(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(body)).await
    }

    pub async fn delete(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, None).await
    }

    pub async fn create_poll(&mut self, question: &str, options: &[&str]) -> Value {
        let options: Vec<Value> = options
            .iter()
            .map(|text| serde_json::json!({"text": text, "votes": 0, "color": ""}))
            .collect();
        let (status, body) = self
            .post("/polls", serde_json::json!({"question": question, "options": options}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        body
    }
}

pub fn votes(poll: &Value) -> Vec<u64> {
    poll["options"]
        .as_array()
        .expect("options array")
        .iter()
        .map(|o| o["votes"].as_u64().expect("vote count"))
        .collect()
}
