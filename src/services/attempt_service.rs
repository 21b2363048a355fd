//! Drives a single attempt through its lifecycle.
//!
//! Every write goes through [`AttemptService::mutate`], a read-modify-CAS loop
//! on the submission's version: concurrent writers never lose each other's
//! updates, and only one of two racing finalizers can win.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::Store;
use crate::dto::submission_dto::{
    AnswerRequest, AnswerResponse, AttemptStatusResponse, CandidateOptionView,
    CandidateQuestionView, CandidateTestCaseView, CodeRequest, FinalizeResponse, SavedAnswerView,
    StartAttemptResponse, SubmissionSummary,
};
use crate::error::{Error, Result};
use crate::models::identity::Identity;
use crate::models::question::Question;
use crate::models::test::Test;
use crate::models::test_submission::{
    CodeSubmission, FinalizeTrigger, McqAnswer, SubmissionStatus, TestSubmission,
};
use crate::services::grading_service::{grade_mcq, GradingService};
use crate::services::notification_service::{Notification, NotificationService};
use crate::services::report_service::{generate_report, SubmissionReport};
use crate::services::score_service::{compute_scores, ScoreService};
use crate::services::test_service::ensure_owner;
use crate::utils::time::Clock;

pub const MAX_CAS_RETRIES: usize = 5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub expired: usize,
    pub timed_out: usize,
}

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn Store>,
    grading: GradingService,
    scores: ScoreService,
    notifications: NotificationService,
    clock: Arc<dyn Clock>,
}

impl AttemptService {
    pub fn new(
        store: Arc<dyn Store>,
        grading: GradingService,
        scores: ScoreService,
        notifications: NotificationService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            grading,
            scores,
            notifications,
            clock,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reads the submission, applies `f` and writes it back if nobody else
    /// wrote in between. Retries from a fresh read on a lost race.
    pub(crate) async fn mutate<T, F>(
        &self,
        submission_id: Uuid,
        mut f: F,
    ) -> Result<(TestSubmission, T)>
    where
        F: FnMut(&mut TestSubmission) -> Result<T> + Send,
        T: Send,
    {
        for attempt in 1..=MAX_CAS_RETRIES {
            let mut submission = self.store.get_submission(submission_id).await?;
            let out = f(&mut submission)?;
            if self.store.save_submission(&submission).await? {
                submission.version += 1;
                return Ok((submission, out));
            }
            tracing::debug!(submission_id = %submission_id, attempt, "stale submission version, retrying");
        }
        Err(Error::Conflict(
            "submission is being modified concurrently; retry the request".to_string(),
        ))
    }

    pub(crate) async fn load_owned(
        &self,
        submission_id: Uuid,
        actor: &Identity,
    ) -> Result<(TestSubmission, Test)> {
        let submission = self.store.get_submission(submission_id).await?;
        if submission.candidate_id != actor.user_id {
            return Err(Error::Unauthorized(
                "submission belongs to another candidate".to_string(),
            ));
        }
        let test = self.store.get_test(submission.test_id).await?;
        Ok((submission, test))
    }

    /// An attempt accepts input only while in progress and before its deadline.
    pub(crate) fn check_open(
        submission: &TestSubmission,
        test: &Test,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if submission.status != SubmissionStatus::InProgress {
            return Err(Error::Conflict(format!(
                "submission is {}, not in progress",
                submission.status.as_str()
            )));
        }
        if submission.is_past_deadline(test, now) {
            return Err(Error::DeadlinePassed(
                "the time for this attempt is over".to_string(),
            ));
        }
        Ok(())
    }

    /// Passes `result` through; a deadline rejection first closes the attempt.
    pub(crate) async fn reject_late<T>(
        &self,
        submission_id: Uuid,
        test: &Test,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(Error::DeadlinePassed(_)) = &result {
            self.force_timeout(submission_id, test).await;
        }
        result
    }

    async fn force_timeout(&self, submission_id: Uuid, test: &Test) {
        match self
            .finalize_with(submission_id, test, FinalizeTrigger::Timeout)
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_conflict() => {}
            Err(err) => {
                tracing::error!(submission_id = %submission_id, error = %err, "forced timeout finalize failed")
            }
        }
    }

    pub async fn start(&self, submission_id: Uuid, actor: &Identity) -> Result<StartAttemptResponse> {
        let (submission, test) = self.load_owned(submission_id, actor).await?;
        let now = self.now();

        let submission = match submission.status {
            SubmissionStatus::InProgress => {
                let open = Self::check_open(&submission, &test, now);
                self.reject_late(submission_id, &test, open).await?;
                submission
            }
            SubmissionStatus::Scheduled => {
                if submission.window_lapsed(now) {
                    self.expire(submission_id, now).await.ok();
                    return Err(Error::DeadlinePassed(
                        "the window for this test has closed".to_string(),
                    ));
                }
                if now < submission.scheduled_at {
                    return Err(Error::Conflict(format!(
                        "test opens at {}",
                        submission.scheduled_at.to_rfc3339()
                    )));
                }
                let (started, _) = self
                    .mutate(submission_id, |s| match s.status {
                        SubmissionStatus::Scheduled => {
                            s.transition(SubmissionStatus::InProgress)?;
                            s.started_at = Some(now);
                            s.updated_at = now;
                            Ok(())
                        }
                        SubmissionStatus::InProgress => Ok(()),
                        other => Err(Error::Conflict(format!(
                            "submission is already {}",
                            other.as_str()
                        ))),
                    })
                    .await?;
                tracing::info!(submission_id = %submission_id, test_id = %test.id, "attempt started");
                started
            }
            other => {
                return Err(Error::Conflict(format!(
                    "submission is already {}",
                    other.as_str()
                )))
            }
        };

        candidate_view(&test, &submission)
    }

    pub async fn submit_mcq_answer(
        &self,
        submission_id: Uuid,
        actor: &Identity,
        request: AnswerRequest,
    ) -> Result<AnswerResponse> {
        let (submission, test) = self.load_owned(submission_id, actor).await?;
        let open = Self::check_open(&submission, &test, self.now());
        self.reject_late(submission_id, &test, open).await?;

        let question = match test.question(request.question_index) {
            Some(Question::Mcq(q)) => q,
            Some(_) => {
                return Err(Error::Validation(format!(
                    "question {} is not a multiple-choice question",
                    request.question_index
                )))
            }
            None => {
                return Err(Error::Validation(format!(
                    "question index {} is out of range",
                    request.question_index
                )))
            }
        };
        let (is_correct, points_earned) = grade_mcq(question, request.selected_option)?;

        let question_id = question.id;
        let result = self
            .mutate(submission_id, |s| {
                let now = self.now();
                Self::check_open(s, &test, now)?;
                s.upsert_mcq_answer(McqAnswer {
                    question_index: request.question_index,
                    question_id,
                    selected_option: request.selected_option,
                    is_correct,
                    points_earned,
                    answered_at: now,
                });
                s.updated_at = now;
                Ok(now)
            })
            .await;
        let (_, answered_at) = self.reject_late(submission_id, &test, result).await?;

        Ok(AnswerResponse {
            question_index: request.question_index,
            selected_option: request.selected_option,
            answered_at,
        })
    }

    /// Grades the code against every test case and replaces any earlier
    /// attempt at the same question. The returned copy hides hidden cases.
    pub async fn submit_code(
        &self,
        submission_id: Uuid,
        actor: &Identity,
        request: CodeRequest,
    ) -> Result<CodeSubmission> {
        let (submission, test) = self.load_owned(submission_id, actor).await?;
        let open = Self::check_open(&submission, &test, self.now());
        self.reject_late(submission_id, &test, open).await?;

        let question = match test.question(request.question_index) {
            Some(Question::Coding(q)) => q,
            Some(_) => {
                return Err(Error::Validation(format!(
                    "question {} is not a coding question",
                    request.question_index
                )))
            }
            None => {
                return Err(Error::Validation(format!(
                    "question index {} is out of range",
                    request.question_index
                )))
            }
        };
        if !question.accepts(request.language) {
            return Err(Error::Validation(format!(
                "language '{}' is not allowed for question {}",
                request.language, request.question_index
            )));
        }

        let mut graded = self
            .grading
            .grade_coding(request.question_index, question, &request.code, request.language)
            .await;

        let result = self
            .mutate(submission_id, |s| {
                let now = self.now();
                Self::check_open(s, &test, now)?;
                graded.submitted_at = now;
                s.upsert_code_submission(graded.clone());
                s.updated_at = now;
                Ok(())
            })
            .await;
        self.reject_late(submission_id, &test, result).await?;

        tracing::info!(
            submission_id = %submission_id,
            question_index = request.question_index,
            passed = graded.total_passed,
            total = graded.total_test_cases,
            mode = ?graded.execution_mode,
            "code graded"
        );
        Ok(graded.redacted())
    }

    pub async fn finalize(&self, submission_id: Uuid, actor: &Identity) -> Result<FinalizeResponse> {
        let (_, test) = self.load_owned(submission_id, actor).await?;
        let submission = self
            .finalize_with(submission_id, &test, FinalizeTrigger::Manual)
            .await?;
        finalize_response(&test, &submission)
    }

    /// Finalize on behalf of the system (proctoring, timeout sweep).
    pub async fn finalize_as(
        &self,
        submission_id: Uuid,
        trigger: FinalizeTrigger,
    ) -> Result<TestSubmission> {
        let submission = self.store.get_submission(submission_id).await?;
        let test = self.store.get_test(submission.test_id).await?;
        self.finalize_with(submission_id, &test, trigger).await
    }

    async fn finalize_with(
        &self,
        submission_id: Uuid,
        test: &Test,
        trigger: FinalizeTrigger,
    ) -> Result<TestSubmission> {
        let now = self.now();
        let (submission, trigger) = self
            .mutate(submission_id, |s| {
                if s.status != SubmissionStatus::InProgress {
                    return Err(Error::Conflict(format!(
                        "submission is {}, not in progress",
                        s.status.as_str()
                    )));
                }
                let started = s.started_at.unwrap_or(now);
                let deadline = started + test.duration();
                let trigger = if trigger == FinalizeTrigger::Manual && now > deadline {
                    FinalizeTrigger::Timeout
                } else {
                    trigger
                };

                s.transition(SubmissionStatus::Submitted)?;
                s.submitted_at = Some(now);
                s.time_spent_seconds = Some((now.min(deadline) - started).num_seconds().max(0));
                s.finalize_trigger = Some(trigger);
                s.scores = Some(compute_scores(test, s));
                s.updated_at = now;
                Ok(trigger)
            })
            .await?;

        let scores = submission.scores.clone().unwrap_or_default();
        tracing::info!(
            submission_id = %submission_id,
            test_id = %test.id,
            trigger = trigger.as_str(),
            total_score = scores.total_score,
            max_score = scores.max_score,
            percentage = scores.percentage,
            "attempt finalized"
        );

        self.scores.refresh_statistics(test.id).await;
        self.notifications.dispatch(Notification::new(
            "test_submitted",
            submission.candidate_id,
            json!({
                "submission_id": submission.id,
                "test_id": test.id,
                "finalize_trigger": trigger.as_str(),
            }),
        ));
        Ok(submission)
    }

    async fn expire(&self, submission_id: Uuid, now: DateTime<Utc>) -> Result<TestSubmission> {
        let (submission, _) = self
            .mutate(submission_id, |s| {
                if s.status != SubmissionStatus::Scheduled || !s.window_lapsed(now) {
                    return Err(Error::Conflict("submission is not expirable".to_string()));
                }
                s.transition(SubmissionStatus::Expired)?;
                s.updated_at = now;
                Ok(())
            })
            .await?;
        tracing::info!(submission_id = %submission_id, "scheduled attempt expired");
        Ok(submission)
    }

    pub async fn status(&self, submission_id: Uuid, actor: &Identity) -> Result<AttemptStatusResponse> {
        let (mut submission, test) = self.load_owned(submission_id, actor).await?;
        let now = self.now();

        if submission.status == SubmissionStatus::InProgress && submission.is_past_deadline(&test, now) {
            self.force_timeout(submission_id, &test).await;
            submission = self.store.get_submission(submission_id).await?;
        }

        let deadline = submission.deadline(&test);
        let seconds_remaining = match (submission.status, deadline) {
            (SubmissionStatus::InProgress, Some(d)) => Some((d - now).num_seconds().max(0)),
            _ => None,
        };
        let scores = if test.settings.show_results_immediately {
            submission.scores.clone()
        } else {
            None
        };

        Ok(AttemptStatusResponse {
            submission_id: submission.id,
            status: submission.status,
            started_at: submission.started_at,
            deadline,
            seconds_remaining,
            mcq_answered: submission.mcq_answers.len(),
            code_submitted: submission.code_submissions.len(),
            total_questions: test.questions.len(),
            finalize_trigger: submission.finalize_trigger,
            scores,
        })
    }

    pub async fn list_for_candidate(
        &self,
        actor: &Identity,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<SubmissionSummary>> {
        let submissions = self
            .store
            .list_submissions_for_candidate(actor.user_id, status)
            .await?;

        let mut shows_results: HashMap<Uuid, bool> = HashMap::new();
        let mut summaries = Vec::with_capacity(submissions.len());
        for s in &submissions {
            let visible = match shows_results.get(&s.test_id) {
                Some(v) => *v,
                None => {
                    let v = self
                        .store
                        .get_test(s.test_id)
                        .await?
                        .settings
                        .show_results_immediately;
                    shows_results.insert(s.test_id, v);
                    v
                }
            };
            let mut summary = SubmissionSummary::from(s);
            if !visible {
                summary.scores = None;
            }
            summaries.push(summary);
        }
        Ok(summaries)
    }

    pub async fn list_for_test(&self, actor: &Identity, test_id: Uuid) -> Result<Vec<SubmissionSummary>> {
        let test = self.store.get_test(test_id).await?;
        ensure_owner(actor, &test)?;
        let submissions = self.store.list_submissions_for_test(test_id, None).await?;
        Ok(submissions.iter().map(SubmissionSummary::from).collect())
    }

    /// Manual review by the issuer: `submitted -> evaluated`.
    pub async fn evaluate(
        &self,
        actor: &Identity,
        submission_id: Uuid,
        notes: Option<String>,
    ) -> Result<SubmissionSummary> {
        let submission = self.store.get_submission(submission_id).await?;
        let test = self.store.get_test(submission.test_id).await?;
        ensure_owner(actor, &test)?;

        let now = self.now();
        let (submission, _) = self
            .mutate(submission_id, |s| {
                s.transition(SubmissionStatus::Evaluated)?;
                s.review_notes = notes.clone();
                s.updated_at = now;
                Ok(())
            })
            .await?;
        tracing::info!(submission_id = %submission_id, reviewer = %actor.user_id, "submission evaluated");

        self.scores.refresh_statistics(test.id).await;
        Ok(SubmissionSummary::from(&submission))
    }

    pub async fn report(&self, actor: &Identity, submission_id: Uuid) -> Result<SubmissionReport> {
        let submission = self.store.get_submission(submission_id).await?;
        let test = self.store.get_test(submission.test_id).await?;
        ensure_owner(actor, &test)?;
        generate_report(&test, &submission)
    }

    /// Expires lapsed scheduled attempts and closes in-progress attempts
    /// past their deadline. A lost race against a candidate is not an error.
    pub async fn sweep_overdue(&self) -> Result<SweepSummary> {
        let now = self.now();
        let overdue = self.store.list_overdue_submissions(now).await?;
        let mut summary = SweepSummary::default();

        for submission in overdue {
            let outcome = match submission.status {
                SubmissionStatus::Scheduled => self
                    .expire(submission.id, now)
                    .await
                    .map(|_| summary.expired += 1),
                SubmissionStatus::InProgress => self
                    .finalize_as(submission.id, FinalizeTrigger::Timeout)
                    .await
                    .map(|_| summary.timed_out += 1),
                _ => Ok(()),
            };
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    tracing::debug!(submission_id = %submission.id, error = %err, "sweep lost race")
                }
                Err(err) => {
                    tracing::warn!(submission_id = %submission.id, error = %err, "sweep could not close submission")
                }
            }
        }

        if summary != SweepSummary::default() {
            tracing::info!(expired = summary.expired, timed_out = summary.timed_out, "deadline sweep");
        }
        Ok(summary)
    }
}

fn finalize_response(test: &Test, submission: &TestSubmission) -> Result<FinalizeResponse> {
    let missing = || Error::Internal("finalized submission lacks finalize data".to_string());
    Ok(FinalizeResponse {
        submission_id: submission.id,
        status: submission.status,
        finalize_trigger: submission.finalize_trigger.ok_or_else(missing)?,
        submitted_at: submission.submitted_at.ok_or_else(missing)?,
        time_spent_seconds: submission.time_spent_seconds.unwrap_or(0),
        scores: if test.settings.show_results_immediately {
            submission.scores.clone()
        } else {
            None
        },
    })
}

/// Sanitized question set: no correct flags, no hidden case data. Order is
/// shuffled per submission when the test asks for it, and is stable across
/// resumes because the shuffle is seeded by the submission id.
fn candidate_view(test: &Test, submission: &TestSubmission) -> Result<StartAttemptResponse> {
    let started_at = submission
        .started_at
        .ok_or_else(|| Error::Internal("in-progress submission without start time".to_string()))?;

    let (hi, lo) = submission.id.as_u64_pair();
    let mut rng = StdRng::seed_from_u64(hi ^ lo);

    let mut order: Vec<usize> = (0..test.questions.len()).collect();
    if test.settings.shuffle_questions {
        order.shuffle(&mut rng);
    }

    let questions = order
        .into_iter()
        .map(|index| match &test.questions[index] {
            Question::Mcq(q) => {
                let mut options: Vec<CandidateOptionView> = q
                    .options
                    .iter()
                    .enumerate()
                    .map(|(option_index, o)| CandidateOptionView {
                        option_index,
                        text: o.text.clone(),
                    })
                    .collect();
                if test.settings.shuffle_options {
                    options.shuffle(&mut rng);
                }
                CandidateQuestionView::Mcq {
                    question_index: index,
                    question_id: q.id,
                    title: q.title.clone(),
                    prompt: q.prompt.clone(),
                    options,
                    points: q.points,
                }
            }
            Question::Coding(q) => CandidateQuestionView::Coding {
                question_index: index,
                question_id: q.id,
                title: q.title.clone(),
                problem_statement: q.problem_statement.clone(),
                sample_input: q.sample_input.clone(),
                sample_output: q.sample_output.clone(),
                allowed_languages: q.allowed_languages.clone(),
                test_cases: q
                    .test_cases
                    .iter()
                    .enumerate()
                    .map(|(case_index, tc)| CandidateTestCaseView {
                        case_index,
                        is_hidden: tc.is_hidden,
                        points: tc.points,
                        input: (!tc.is_hidden).then(|| tc.input.clone()),
                        expected_output: (!tc.is_hidden).then(|| tc.expected_output.clone()),
                    })
                    .collect(),
                points: q.points,
            },
        })
        .collect();

    Ok(StartAttemptResponse {
        submission_id: submission.id,
        test_id: test.id,
        title: test.title.clone(),
        description: test.description.clone(),
        status: submission.status,
        started_at,
        deadline: started_at + test.duration(),
        duration_minutes: test.duration_minutes,
        total_marks: test.total_marks,
        questions,
        saved_answers: submission
            .mcq_answers
            .iter()
            .filter_map(|a| {
                test.question_by_id(a.question_id).map(|(index, _)| SavedAnswerView {
                    question_index: index,
                    selected_option: a.selected_option,
                })
            })
            .collect(),
        submitted_code: submission
            .code_submissions
            .iter()
            .filter_map(|c| test.question_by_id(c.question_id).map(|(index, _)| index))
            .collect(),
    })
}
