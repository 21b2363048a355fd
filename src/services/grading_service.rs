use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::question::{CodingQuestion, Language, McqQuestion, TestCase};
use crate::models::test_submission::{CodeSubmission, ExecutionMode, TestCaseResult};
use crate::services::sandbox_service::{
    CodeExecutor, ExecutionOutcome, ExecutionRequest, ExecutionStatus, SandboxError,
    DEFAULT_CPU_LIMIT_SECS, DEFAULT_MEMORY_LIMIT_KB,
};

/// Trailing whitespace and line-ending differences never fail a case.
pub fn normalize_output(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim().to_string()
}

/// Returns `(is_correct, points_earned)`.
pub fn grade_mcq(question: &McqQuestion, selected_option: usize) -> Result<(bool, i32)> {
    let option = question.options.get(selected_option).ok_or_else(|| {
        Error::Validation(format!(
            "option {} is out of range (question has {} options)",
            selected_option,
            question.options.len()
        ))
    })?;
    if option.is_correct {
        Ok((true, question.points))
    } else {
        Ok((false, 0))
    }
}

#[derive(Clone)]
pub struct GradingService {
    executor: Arc<dyn CodeExecutor>,
    case_timeout: Duration,
}

impl GradingService {
    pub fn new(executor: Arc<dyn CodeExecutor>, case_timeout: Duration) -> Self {
        Self {
            executor,
            case_timeout,
        }
    }

    /// One ad-hoc sandbox run. Nothing is persisted.
    pub async fn dry_run(
        &self,
        code: &str,
        language: Language,
        stdin: &str,
    ) -> Result<ExecutionOutcome> {
        let request =
            ExecutionRequest::new(code, language, stdin).with_time_limit(self.case_timeout);
        match self.executor.execute(&request).await {
            Ok(outcome) => Ok(outcome),
            Err(SandboxError::Unavailable(msg)) => Err(Error::SandboxUnavailable(msg)),
            Err(SandboxError::UnsupportedLanguage(lang)) => Err(Error::SandboxUnavailable(
                format!("no executor available for '{}'", lang),
            )),
            Err(SandboxError::Timeout(limit)) => Ok(timed_out(limit)),
            Err(SandboxError::Rejected(msg)) => Err(Error::Validation(msg)),
        }
    }

    /// Runs every test case of `question` in order. A case that errors or
    /// times out is recorded as failed and grading moves on. The executor
    /// enforces `case_timeout` per run (see `SandboxService`).
    pub async fn grade_coding(
        &self,
        question_index: usize,
        question: &CodingQuestion,
        code: &str,
        language: Language,
    ) -> CodeSubmission {
        let mut results = Vec::with_capacity(question.test_cases.len());
        let mut mode = ExecutionMode::Judged;

        for (case_index, case) in question.test_cases.iter().enumerate() {
            let request = ExecutionRequest {
                source_code: code.to_string(),
                language,
                stdin: case.input.clone(),
                cpu_limit_secs: question.cpu_limit_secs.unwrap_or(DEFAULT_CPU_LIMIT_SECS),
                memory_limit_kb: question.memory_limit_kb.unwrap_or(DEFAULT_MEMORY_LIMIT_KB),
                time_limit: self.case_timeout,
            };

            let result = match self.executor.execute(&request).await {
                Ok(outcome) => {
                    if outcome.mode == ExecutionMode::Degraded {
                        mode = ExecutionMode::Degraded;
                    }
                    judge_case(case_index, case, &outcome)
                }
                Err(SandboxError::Timeout(limit)) => {
                    tracing::warn!(
                        question_id = %question.id,
                        case_index,
                        timeout_ms = limit.as_millis() as u64,
                        "test case timed out"
                    );
                    failed_case(
                        case_index,
                        case,
                        format!("execution exceeded {}s", limit.as_secs_f64()),
                    )
                }
                Err(err) => {
                    tracing::warn!(
                        question_id = %question.id,
                        case_index,
                        error = %err,
                        "test case could not be executed"
                    );
                    failed_case(case_index, case, err.to_string())
                }
            };
            results.push(result);
        }

        let total_passed = results.iter().filter(|r| r.passed).count();
        let points_earned = results
            .iter()
            .map(|r| r.points_earned)
            .sum::<i32>()
            .min(question.points);

        CodeSubmission {
            question_index,
            question_id: question.id,
            language,
            code: code.to_string(),
            total_passed,
            total_test_cases: results.len(),
            test_case_results: results,
            points_earned,
            execution_mode: mode,
            submitted_at: Utc::now(),
        }
    }
}

fn timed_out(limit: Duration) -> ExecutionOutcome {
    ExecutionOutcome {
        stdout: String::new(),
        stderr: format!("execution exceeded {}s", limit.as_secs_f64()),
        compile_output: String::new(),
        status: ExecutionStatus::TimeLimitExceeded,
        status_code: 5,
        time_ms: None,
        memory_kb: None,
        mode: ExecutionMode::Judged,
    }
}

fn judge_case(case_index: usize, case: &TestCase, outcome: &ExecutionOutcome) -> TestCaseResult {
    let actual = normalize_output(&outcome.stdout);
    let expected = normalize_output(&case.expected_output);

    let error = match outcome.status {
        ExecutionStatus::Accepted if actual == expected => None,
        ExecutionStatus::Accepted => Some("wrong answer".to_string()),
        ExecutionStatus::CompilationError => Some(format!(
            "compilation error: {}",
            outcome.compile_output.trim()
        )),
        ExecutionStatus::TimeLimitExceeded => Some("time limit exceeded".to_string()),
        ExecutionStatus::RuntimeError => Some(format!("runtime error: {}", outcome.stderr.trim())),
        ExecutionStatus::InternalError => Some("sandbox internal error".to_string()),
    };
    let passed = error.is_none();

    TestCaseResult {
        case_index,
        is_hidden: case.is_hidden,
        passed,
        points: case.points,
        points_earned: if passed { case.points } else { 0 },
        time_ms: outcome.time_ms,
        memory_kb: outcome.memory_kb,
        input: Some(case.input.clone()),
        expected_output: Some(case.expected_output.clone()),
        actual_output: Some(outcome.stdout.clone()),
        error,
    }
}

fn failed_case(case_index: usize, case: &TestCase, error: String) -> TestCaseResult {
    TestCaseResult {
        case_index,
        is_hidden: case.is_hidden,
        passed: false,
        points: case.points,
        points_earned: 0,
        time_ms: None,
        memory_kb: None,
        input: Some(case.input.clone()),
        expected_output: Some(case.expected_output.clone()),
        actual_output: None,
        error: Some(error),
    }
}
