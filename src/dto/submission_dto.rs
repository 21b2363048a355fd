use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::question::Language;
use crate::models::test_submission::{
    FinalizeTrigger, ProctoringEventType, Scores, SubmissionStatus, TestSubmission,
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignTestPayload {
    pub test_id: Uuid,
    #[validate(length(min = 1, max = 1000, message = "Provide between 1 and 1000 candidates"))]
    pub candidate_ids: Vec<Uuid>,
    /// Defaults to now.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnswerRequest {
    pub question_index: usize,
    pub selected_option: usize,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CodeRequest {
    pub question_index: usize,
    #[validate(length(min = 1, max = 65536, message = "Code must be 1-65536 characters"))]
    pub code: String,
    pub language: Language,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RunCodeRequest {
    #[validate(length(min = 1, max = 65536, message = "Code must be 1-65536 characters"))]
    pub code: String,
    pub language: Language,
    #[serde(default)]
    #[validate(length(max = 65536))]
    pub stdin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProctoringRequest {
    pub event_type: ProctoringEventType,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EvaluateRequest {
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSubmissionsQuery {
    pub status: Option<SubmissionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOptionView {
    /// Position in the authored option list; answers refer to this index.
    pub option_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateTestCaseView {
    pub case_index: usize,
    pub is_hidden: bool,
    pub points: i32,
    pub input: Option<String>,
    pub expected_output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CandidateQuestionView {
    Mcq {
        question_index: usize,
        question_id: Uuid,
        title: String,
        prompt: String,
        options: Vec<CandidateOptionView>,
        points: i32,
    },
    Coding {
        question_index: usize,
        question_id: Uuid,
        title: String,
        problem_statement: String,
        sample_input: String,
        sample_output: String,
        allowed_languages: Vec<Language>,
        test_cases: Vec<CandidateTestCaseView>,
        points: i32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedAnswerView {
    pub question_index: usize,
    pub selected_option: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartAttemptResponse {
    pub submission_id: Uuid,
    pub test_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub duration_minutes: i32,
    pub total_marks: i32,
    pub questions: Vec<CandidateQuestionView>,
    pub saved_answers: Vec<SavedAnswerView>,
    pub submitted_code: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub question_index: usize,
    pub selected_option: usize,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptStatusResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub seconds_remaining: Option<i64>,
    pub mcq_answered: usize,
    pub code_submitted: usize,
    pub total_questions: usize,
    pub finalize_trigger: Option<FinalizeTrigger>,
    pub scores: Option<Scores>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub finalize_trigger: FinalizeTrigger,
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i64,
    /// Present only when the test shows results immediately.
    pub scores: Option<Scores>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProctoringResponse {
    pub tab_switch_count: i32,
    pub flagged: bool,
    pub terminated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionSummary {
    pub id: Uuid,
    pub test_id: Uuid,
    pub candidate_id: Uuid,
    pub status: SubmissionStatus,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub finalize_trigger: Option<FinalizeTrigger>,
    pub scores: Option<Scores>,
    pub flagged: bool,
    pub tab_switch_count: i32,
}

impl From<&TestSubmission> for SubmissionSummary {
    fn from(s: &TestSubmission) -> Self {
        Self {
            id: s.id,
            test_id: s.test_id,
            candidate_id: s.candidate_id,
            status: s.status,
            scheduled_at: s.scheduled_at,
            expires_at: s.expires_at,
            started_at: s.started_at,
            submitted_at: s.submitted_at,
            time_spent_seconds: s.time_spent_seconds,
            finalize_trigger: s.finalize_trigger,
            scores: s.scores.clone(),
            flagged: s.proctoring.flagged,
            tab_switch_count: s.proctoring.tab_switch_count,
        }
    }
}
