use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::question::{Language, Question};
use crate::models::test::Test;
use crate::models::test_submission::{
    ExecutionMode, FinalizeTrigger, ProctoringEvent, ProctoringEventType, Scores,
    SubmissionStatus, TestCaseResult, TestSubmission,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recommendation {
    Excellent,
    Good,
    Average,
    #[serde(rename = "Below Average")]
    BelowAverage,
}

impl Recommendation {
    pub fn from_percentage(percentage: i32) -> Self {
        match percentage {
            p if p >= 90 => Recommendation::Excellent,
            p if p >= 70 => Recommendation::Good,
            p if p >= 50 => Recommendation::Average,
            _ => Recommendation::BelowAverage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionReport {
    Mcq {
        question_index: usize,
        question_id: Uuid,
        title: String,
        points: i32,
        answered: bool,
        selected_option: Option<usize>,
        selected_text: Option<String>,
        correct_options: Vec<usize>,
        is_correct: bool,
        points_earned: i32,
    },
    Coding {
        question_index: usize,
        question_id: Uuid,
        title: String,
        points: i32,
        attempted: bool,
        language: Option<Language>,
        code: Option<String>,
        total_passed: usize,
        total_test_cases: usize,
        points_earned: i32,
        execution_mode: Option<ExecutionMode>,
        test_case_results: Vec<TestCaseResult>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProctoringSummary {
    pub tab_switch_count: i32,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    /// Most recent events only; `event_counts` covers the whole attempt.
    pub events: Vec<ProctoringEvent>,
    pub event_counts: BTreeMap<ProctoringEventType, u32>,
}

/// Full issuer-side view of a finalized attempt, hidden test cases included.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub submission_id: Uuid,
    pub test_id: Uuid,
    pub test_title: String,
    pub candidate_id: Uuid,
    pub status: SubmissionStatus,
    pub finalize_trigger: Option<FinalizeTrigger>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub scores: Scores,
    pub coding_percentage: Option<i32>,
    pub recommendation: Recommendation,
    pub degraded_execution: bool,
    pub questions: Vec<QuestionReport>,
    pub proctoring: ProctoringSummary,
    pub review_notes: Option<String>,
}

pub fn generate_report(test: &Test, submission: &TestSubmission) -> Result<SubmissionReport> {
    if !submission.status.is_finalized() {
        return Err(Error::Conflict(format!(
            "no report for a submission that is {}",
            submission.status.as_str()
        )));
    }
    let scores = submission
        .scores
        .clone()
        .ok_or_else(|| Error::Internal("finalized submission has no scores".to_string()))?;

    let coding_percentage = (scores.coding_total > 0).then(|| {
        ((scores.coding_score as f64 / scores.coding_total as f64) * 100.0).round() as i32
    });
    let recommendation =
        Recommendation::from_percentage(coding_percentage.unwrap_or(scores.percentage));

    let questions = test
        .questions
        .iter()
        .enumerate()
        .map(|(index, question)| match question {
            Question::Mcq(q) => {
                let answer = submission.mcq_answers.iter().find(|a| a.question_id == q.id);
                QuestionReport::Mcq {
                    question_index: index,
                    question_id: q.id,
                    title: q.title.clone(),
                    points: q.points,
                    answered: answer.is_some(),
                    selected_option: answer.map(|a| a.selected_option),
                    selected_text: answer
                        .and_then(|a| q.options.get(a.selected_option))
                        .map(|o| o.text.clone()),
                    correct_options: q
                        .options
                        .iter()
                        .enumerate()
                        .filter(|(_, o)| o.is_correct)
                        .map(|(i, _)| i)
                        .collect(),
                    is_correct: answer.map(|a| a.is_correct).unwrap_or(false),
                    points_earned: answer.map(|a| a.points_earned.min(q.points)).unwrap_or(0),
                }
            }
            Question::Coding(q) => {
                let attempt = submission.code_submissions.iter().find(|c| c.question_id == q.id);
                QuestionReport::Coding {
                    question_index: index,
                    question_id: q.id,
                    title: q.title.clone(),
                    points: q.points,
                    attempted: attempt.is_some(),
                    language: attempt.map(|c| c.language),
                    code: attempt.map(|c| c.code.clone()),
                    total_passed: attempt.map(|c| c.total_passed).unwrap_or(0),
                    total_test_cases: q.test_cases.len(),
                    points_earned: attempt.map(|c| c.points_earned.min(q.points)).unwrap_or(0),
                    execution_mode: attempt.map(|c| c.execution_mode),
                    test_case_results: attempt
                        .map(|c| c.test_case_results.clone())
                        .unwrap_or_default(),
                }
            }
        })
        .collect();

    Ok(SubmissionReport {
        submission_id: submission.id,
        test_id: test.id,
        test_title: test.title.clone(),
        candidate_id: submission.candidate_id,
        status: submission.status,
        finalize_trigger: submission.finalize_trigger,
        started_at: submission.started_at,
        submitted_at: submission.submitted_at,
        time_spent_seconds: submission.time_spent_seconds,
        scores,
        coding_percentage,
        recommendation,
        degraded_execution: submission.has_degraded_runs(),
        questions,
        proctoring: ProctoringSummary {
            tab_switch_count: submission.proctoring.tab_switch_count,
            flagged: submission.proctoring.flagged,
            flag_reason: submission.proctoring.flag_reason.clone(),
            events: submission.proctoring.events.clone(),
            event_counts: submission.proctoring.event_counts.clone(),
        },
        review_notes: submission.review_notes.clone(),
    })
}
