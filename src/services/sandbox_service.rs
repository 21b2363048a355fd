//! Adapter to the external code-execution sandbox.
//!
//! The primary executor speaks the Judge0 HTTP API. When the sandbox cannot be
//! reached, calls are retried on a local interpreter and the outcome is tagged
//! `Degraded` so reports can tell judged runs apart from fallback runs.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::models::question::Language;
use crate::models::test_submission::ExecutionMode;

pub const DEFAULT_CPU_LIMIT_SECS: f64 = 2.0;
pub const DEFAULT_MEMORY_LIMIT_KB: u64 = 128_000;
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language: Language,
    pub stdin: String,
    pub cpu_limit_secs: f64,
    pub memory_limit_kb: u64,
    /// Wall-clock budget of the run itself. Time spent waiting for a free
    /// sandbox slot is not counted.
    pub time_limit: Duration,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, language: Language, stdin: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            language,
            stdin: stdin.into(),
            cpu_limit_secs: DEFAULT_CPU_LIMIT_SECS,
            memory_limit_kb: DEFAULT_MEMORY_LIMIT_KB,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Accepted,
    TimeLimitExceeded,
    CompilationError,
    RuntimeError,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    pub status: ExecutionStatus,
    pub status_code: i32,
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox unreachable: {0}")]
    Unavailable(String),

    #[error("execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("sandbox rejected the request: {0}")]
    Rejected(String),

    #[error("language '{0}' is not supported by this executor")]
    UnsupportedLanguage(Language),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError>;
}

/// Static language table of the Judge0 CE deployment.
pub fn judge0_language_id(language: Language) -> u32 {
    match language {
        Language::C => 50,
        Language::Cpp => 54,
        Language::Go => 60,
        Language::Java => 62,
        Language::Javascript => 63,
        Language::Python => 71,
        Language::Rust => 73,
        Language::Typescript => 74,
    }
}

fn status_from_judge0(id: i32) -> ExecutionStatus {
    match id {
        3 | 4 => ExecutionStatus::Accepted,
        5 => ExecutionStatus::TimeLimitExceeded,
        6 => ExecutionStatus::CompilationError,
        7..=12 | 14 => ExecutionStatus::RuntimeError,
        _ => ExecutionStatus::InternalError,
    }
}

#[derive(Debug, Serialize)]
struct Judge0Request<'a> {
    source_code: &'a str,
    language_id: u32,
    stdin: &'a str,
    cpu_time_limit: f64,
    memory_limit: u64,
}

#[derive(Debug, Deserialize)]
struct Judge0Status {
    id: i32,
}

#[derive(Debug, Deserialize)]
struct Judge0Response {
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    time: Option<String>,
    memory: Option<u64>,
    status: Judge0Status,
}

#[derive(Clone)]
pub struct Judge0Executor {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl Judge0Executor {
    pub fn new(client: Client, base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }
}

#[async_trait]
impl CodeExecutor for Judge0Executor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let body = Judge0Request {
            source_code: &request.source_code,
            language_id: judge0_language_id(request.language),
            stdin: &request.stdin,
            cpu_time_limit: request.cpu_limit_secs,
            memory_limit: request.memory_limit_kb,
        };

        let mut req = self
            .client
            .post(format!(
                "{}/submissions?base64_encoded=false&wait=true",
                self.base_url
            ))
            .json(&body);
        if let Some(token) = &self.auth_token {
            req = req.header("X-Auth-Token", token);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                SandboxError::Unavailable(format!("no answer before the client timeout: {}", e))
            } else {
                SandboxError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SandboxError::Unavailable(format!("sandbox answered {}", status)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Rejected(format!("{}: {}", status, text)));
        }

        let parsed: Judge0Response = resp
            .json()
            .await
            .map_err(|e| SandboxError::Rejected(format!("unreadable sandbox response: {}", e)))?;

        let time_ms = parsed
            .time
            .as_deref()
            .and_then(|t| t.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0).round() as u64);

        let mut stderr = parsed.stderr.unwrap_or_default();
        if stderr.is_empty() {
            stderr = parsed.message.unwrap_or_default();
        }

        Ok(ExecutionOutcome {
            stdout: parsed.stdout.unwrap_or_default(),
            stderr,
            compile_output: parsed.compile_output.unwrap_or_default(),
            status: status_from_judge0(parsed.status.id),
            status_code: parsed.status.id,
            time_ms,
            memory_kb: parsed.memory,
            mode: ExecutionMode::Judged,
        })
    }
}

/// Degraded executor: runs interpreted languages with the host's own
/// interpreters. Memory limits are not enforced here.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    timeout: Duration,
    python_cmd: String,
    node_cmd: String,
}

impl LocalExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            python_cmd: "python3".to_string(),
            node_cmd: "node".to_string(),
        }
    }

    pub fn with_python_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.python_cmd = cmd.into();
        self
    }

    pub fn with_node_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.node_cmd = cmd.into();
        self
    }

    fn command_for(&self, request: &ExecutionRequest) -> Result<Command, SandboxError> {
        let (program, flag) = match request.language {
            Language::Python => (&self.python_cmd, "-c"),
            Language::Javascript => (&self.node_cmd, "-e"),
            other => return Err(SandboxError::UnsupportedLanguage(other)),
        };
        let path_env =
            std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/usr/local/bin:/bin".to_string());
        let mut cmd = Command::new(program);
        cmd.arg(flag)
            .arg(&request.source_code)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", path_env)
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl CodeExecutor for LocalExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let mut cmd = self.command_for(request)?;
        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Unavailable(format!("local interpreter: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that never reads stdin closes the pipe early; that is not an error.
            let _ = stdin.write_all(request.stdin.as_bytes()).await;
        }

        let cpu_limit = Duration::try_from_secs_f64(request.cpu_limit_secs.max(0.1))
            .unwrap_or(self.timeout);
        let limit = self.timeout.min(request.time_limit).min(cpu_limit);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SandboxError::Unavailable(format!("local interpreter: {}", e)))
            }
            Err(_) => return Err(SandboxError::Timeout(limit)),
        };

        let status = if output.status.success() {
            ExecutionStatus::Accepted
        } else {
            ExecutionStatus::RuntimeError
        };

        Ok(ExecutionOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            compile_output: String::new(),
            status,
            status_code: output.status.code().unwrap_or(-1),
            time_ms: Some(start.elapsed().as_millis() as u64),
            memory_kb: None,
            mode: ExecutionMode::Degraded,
        })
    }
}

/// The sandbox client the rest of the engine talks to: bounded concurrency
/// in front of the primary executor, with an optional degraded fallback.
#[derive(Clone)]
pub struct SandboxService {
    primary: Option<Arc<dyn CodeExecutor>>,
    fallback: Option<Arc<dyn CodeExecutor>>,
    permits: Arc<Semaphore>,
}

impl SandboxService {
    pub fn new(
        primary: Option<Arc<dyn CodeExecutor>>,
        fallback: Option<Arc<dyn CodeExecutor>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn from_config(config: &Config, client: Client) -> Self {
        let primary = config.sandbox_url.as_ref().map(|url| {
            Arc::new(Judge0Executor::new(
                client,
                url.clone(),
                config.sandbox_auth_token.clone(),
            )) as Arc<dyn CodeExecutor>
        });
        let fallback = config.sandbox_local_fallback.then(|| {
            Arc::new(LocalExecutor::new(Duration::from_secs(config.case_timeout_secs)))
                as Arc<dyn CodeExecutor>
        });
        if primary.is_none() {
            tracing::warn!("SANDBOX_URL is not set; code runs only on the degraded executor");
        }
        Self::new(primary, fallback, config.sandbox_max_concurrency)
    }

    async fn run_fallback(
        &self,
        request: &ExecutionRequest,
        cause: SandboxError,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let Some(fallback) = &self.fallback else {
            return Err(cause);
        };
        tracing::warn!(
            language = %request.language,
            cause = %cause,
            "sandbox unavailable, running on degraded executor"
        );
        let mut outcome = timed(fallback.as_ref(), request).await?;
        outcome.mode = ExecutionMode::Degraded;
        Ok(outcome)
    }
}

async fn timed(
    executor: &dyn CodeExecutor,
    request: &ExecutionRequest,
) -> Result<ExecutionOutcome, SandboxError> {
    match tokio::time::timeout(request.time_limit, executor.execute(request)).await {
        Ok(result) => result,
        Err(_) => Err(SandboxError::Timeout(request.time_limit)),
    }
}

#[async_trait]
impl CodeExecutor for SandboxService {
    /// `request.time_limit` starts counting once a slot is held.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SandboxError::Unavailable("sandbox pool closed".to_string()))?;

        let Some(primary) = &self.primary else {
            return self
                .run_fallback(request, SandboxError::Unavailable("no sandbox configured".into()))
                .await;
        };

        match timed(primary.as_ref(), request).await {
            Err(SandboxError::Unavailable(reason)) => {
                self.run_fallback(request, SandboxError::Unavailable(reason))
                    .await
            }
            other => other,
        }
    }
}
