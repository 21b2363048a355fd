#![allow(dead_code)]

use std::sync::Arc;

use assessment_engine::{
    config::Config,
    database::MemoryStore,
    middleware::auth::issue_token,
    models::{identity::Role, test_submission::ExecutionMode},
    routes,
    services::{
        notification_service::LogNotifier,
        sandbox_service::{
            CodeExecutor, ExecutionOutcome, ExecutionRequest, ExecutionStatus, SandboxError,
        },
    },
    utils::time::ManualClock,
    AppState,
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "test_secret_key";

/// Stand-in sandbox: programs containing `sum` print the sum of the
/// integers on stdin, anything else prints nothing.
pub struct SummingExecutor;

#[async_trait]
impl CodeExecutor for SummingExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let stdout = if request.source_code.contains("sum") {
            let total: i64 = request
                .stdin
                .split_whitespace()
                .filter_map(|n| n.parse::<i64>().ok())
                .sum();
            format!("{}\n", total)
        } else {
            String::new()
        };
        Ok(ExecutionOutcome {
            stdout,
            stderr: String::new(),
            compile_output: String::new(),
            status: ExecutionStatus::Accepted,
            status_code: 3,
            time_ms: Some(4),
            memory_kb: Some(2048),
            mode: ExecutionMode::Judged,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub issuer_id: Uuid,
    pub issuer_token: String,
}

impl TestApp {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = AppState::builder(
            Config::new("127.0.0.1:0", SECRET),
            Arc::new(MemoryStore::new()),
        )
        .executor(Arc::new(SummingExecutor))
        .clock(clock.clone())
        .notifier(Arc::new(LogNotifier))
        .build()
        .expect("app state");

        let issuer_id = Uuid::new_v4();
        Self {
            router: routes::router(state),
            clock,
            issuer_id,
            issuer_token: token(issuer_id, Role::Issuer),
        }
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }
}

pub fn token(user_id: Uuid, role: Role) -> String {
    issue_token(SECRET, user_id, role, chrono::Duration::hours(1)).expect("token")
}
