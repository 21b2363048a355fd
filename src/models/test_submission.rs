use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::question::Language;
use super::test::Test;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Scheduled,
    InProgress,
    Submitted,
    Evaluated,
    Expired,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Scheduled => "scheduled",
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Evaluated => "evaluated",
            SubmissionStatus::Expired => "expired",
        }
    }

    /// The complete transition table of an attempt.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Scheduled, InProgress)
                | (Scheduled, Expired)
                | (InProgress, Submitted)
                | (Submitted, Evaluated)
        )
    }

    pub fn is_finalized(self) -> bool {
        matches!(self, SubmissionStatus::Submitted | SubmissionStatus::Evaluated)
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(SubmissionStatus::Scheduled),
            "in_progress" => Ok(SubmissionStatus::InProgress),
            "submitted" => Ok(SubmissionStatus::Submitted),
            "evaluated" => Ok(SubmissionStatus::Evaluated),
            "expired" => Ok(SubmissionStatus::Expired),
            other => Err(format!("unknown submission status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeTrigger {
    Manual,
    Timeout,
    Proctoring,
}

impl FinalizeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeTrigger::Manual => "manual",
            FinalizeTrigger::Timeout => "timeout",
            FinalizeTrigger::Proctoring => "proctoring",
        }
    }
}

impl FromStr for FinalizeTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(FinalizeTrigger::Manual),
            "timeout" => Ok(FinalizeTrigger::Timeout),
            "proctoring" => Ok(FinalizeTrigger::Proctoring),
            other => Err(format!("unknown finalize trigger '{}'", other)),
        }
    }
}

/// Whether a run went through the real sandbox or the local fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Judged,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqAnswer {
    pub question_index: usize,
    pub question_id: Uuid,
    pub selected_option: usize,
    pub is_correct: bool,
    pub points_earned: i32,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub case_index: usize,
    pub is_hidden: bool,
    pub passed: bool,
    pub points: i32,
    pub points_earned: i32,
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub input: Option<String>,
    pub expected_output: Option<String>,
    pub actual_output: Option<String>,
    pub error: Option<String>,
}

impl TestCaseResult {
    /// Candidate-facing copy: hidden cases keep only pass/fail and timing.
    pub fn redacted(&self) -> Self {
        if !self.is_hidden {
            return self.clone();
        }
        Self {
            input: None,
            expected_output: None,
            actual_output: None,
            error: self.error.as_ref().map(|_| "hidden test case failed".to_string()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSubmission {
    pub question_index: usize,
    pub question_id: Uuid,
    pub language: Language,
    pub code: String,
    pub test_case_results: Vec<TestCaseResult>,
    pub total_passed: usize,
    pub total_test_cases: usize,
    pub points_earned: i32,
    pub execution_mode: ExecutionMode,
    pub submitted_at: DateTime<Utc>,
}

impl CodeSubmission {
    pub fn redacted(&self) -> Self {
        Self {
            test_case_results: self
                .test_case_results
                .iter()
                .map(TestCaseResult::redacted)
                .collect(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub mcq_score: i32,
    pub mcq_total: i32,
    pub coding_score: i32,
    pub coding_total: i32,
    pub total_score: i32,
    pub max_score: i32,
    pub percentage: i32,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProctoringEventType {
    TabSwitch,
    WindowBlur,
    CopyPaste,
    FullscreenExit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProctoringEvent {
    pub event_type: ProctoringEventType,
    pub occurred_at: DateTime<Utc>,
}

/// Most recent events kept in the log; older ones survive only in `event_counts`.
pub const MAX_PROCTORING_EVENTS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctoringRecord {
    pub tab_switch_count: i32,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    pub events: Vec<ProctoringEvent>,
    pub event_counts: BTreeMap<ProctoringEventType, u32>,
}

impl ProctoringRecord {
    pub fn record(&mut self, event_type: ProctoringEventType, occurred_at: DateTime<Utc>) {
        *self.event_counts.entry(event_type).or_insert(0) += 1;
        if event_type == ProctoringEventType::TabSwitch {
            self.tab_switch_count += 1;
        }
        self.events.push(ProctoringEvent {
            event_type,
            occurred_at,
        });
        if self.events.len() > MAX_PROCTORING_EVENTS {
            let excess = self.events.len() - MAX_PROCTORING_EVENTS;
            self.events.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSubmission {
    pub id: Uuid,
    pub test_id: Uuid,
    pub candidate_id: Uuid,
    pub scheduler_id: Uuid,
    pub status: SubmissionStatus,
    /// Optimistic concurrency counter, bumped by every successful write.
    pub version: i64,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub finalize_trigger: Option<FinalizeTrigger>,
    pub mcq_answers: Vec<McqAnswer>,
    pub code_submissions: Vec<CodeSubmission>,
    pub scores: Option<Scores>,
    pub proctoring: ProctoringRecord,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestSubmission {
    pub fn new_scheduled(
        test_id: Uuid,
        candidate_id: Uuid,
        scheduler_id: Uuid,
        scheduled_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            candidate_id,
            scheduler_id,
            status: SubmissionStatus::Scheduled,
            version: 0,
            scheduled_at,
            expires_at,
            started_at: None,
            submitted_at: None,
            time_spent_seconds: None,
            finalize_trigger: None,
            mcq_answers: Vec::new(),
            code_submissions: Vec::new(),
            scores: None,
            proctoring: ProctoringRecord::default(),
            review_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Authoritative end of the attempt: `started_at + duration`.
    pub fn deadline(&self, test: &Test) -> Option<DateTime<Utc>> {
        self.started_at.map(|started| started + test.duration())
    }

    pub fn is_past_deadline(&self, test: &Test, now: DateTime<Utc>) -> bool {
        self.deadline(test).map(|d| now > d).unwrap_or(false)
    }

    pub fn window_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now > e).unwrap_or(false)
    }

    pub fn transition(&mut self, next: SubmissionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "cannot move submission from '{}' to '{}'",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn upsert_mcq_answer(&mut self, answer: McqAnswer) {
        match self
            .mcq_answers
            .iter_mut()
            .find(|a| a.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.mcq_answers.push(answer),
        }
    }

    /// Last attempt wins: a new run replaces every trace of the previous one.
    pub fn upsert_code_submission(&mut self, submission: CodeSubmission) {
        match self
            .code_submissions
            .iter_mut()
            .find(|c| c.question_id == submission.question_id)
        {
            Some(existing) => *existing = submission,
            None => self.code_submissions.push(submission),
        }
    }

    pub fn has_degraded_runs(&self) -> bool {
        self.code_submissions
            .iter()
            .any(|c| c.execution_mode == ExecutionMode::Degraded)
    }
}
