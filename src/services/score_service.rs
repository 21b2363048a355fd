use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::database::Store;
use crate::error::{Error, Result};
use crate::models::question::Question;
use crate::models::test::{Test, TestStatistics};
use crate::models::test_submission::{Scores, SubmissionStatus, TestSubmission};

const STATISTICS_ATTEMPTS: u32 = 3;
const STATISTICS_BACKOFF: Duration = Duration::from_millis(100);

/// Scores a submission against the current definition of its test.
/// Answers whose question id is gone from the test are ignored, and no
/// question ever contributes more than its own points.
pub fn compute_scores(test: &Test, submission: &TestSubmission) -> Scores {
    let mut mcq_total = 0;
    let mut coding_total = 0;
    for q in &test.questions {
        match q {
            Question::Mcq(m) => mcq_total += m.points,
            Question::Coding(c) => coding_total += c.points,
        }
    }

    let mcq_score: i32 = submission
        .mcq_answers
        .iter()
        .filter_map(|a| match test.question_by_id(a.question_id) {
            Some((_, Question::Mcq(m))) => Some(a.points_earned.clamp(0, m.points)),
            _ => None,
        })
        .sum();

    let coding_score: i32 = submission
        .code_submissions
        .iter()
        .filter_map(|c| match test.question_by_id(c.question_id) {
            Some((_, Question::Coding(q))) => Some(c.points_earned.clamp(0, q.points)),
            _ => None,
        })
        .sum();

    let total_score = mcq_score + coding_score;
    let max_score = mcq_total + coding_total;
    let percentage = if max_score > 0 {
        ((total_score as f64 / max_score as f64) * 100.0).round() as i32
    } else {
        0
    };

    Scores {
        mcq_score,
        mcq_total,
        coding_score,
        coding_total,
        total_score,
        max_score,
        percentage,
        passed: percentage >= test.passing_percentage,
    }
}

/// Aggregates over finalized attempts. Attempts without scores are skipped.
pub fn compute_statistics(submissions: &[TestSubmission]) -> TestStatistics {
    let scored: Vec<&Scores> = submissions
        .iter()
        .filter(|s| s.status.is_finalized())
        .filter_map(|s| s.scores.as_ref())
        .collect();

    if scored.is_empty() {
        return TestStatistics {
            updated_at: Some(Utc::now()),
            ..TestStatistics::default()
        };
    }

    let total: i64 = scored.iter().map(|s| s.total_score as i64).sum();
    TestStatistics {
        total_attempts: scored.len() as i64,
        average_score: total as f64 / scored.len() as f64,
        highest_score: scored.iter().map(|s| s.total_score).max().unwrap_or(0),
        lowest_score: scored.iter().map(|s| s.total_score).min().unwrap_or(0),
        pass_count: scored.iter().filter(|s| s.passed).count() as i64,
        updated_at: Some(Utc::now()),
    }
}

#[derive(Clone)]
pub struct ScoreService {
    store: Arc<dyn Store>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ScoreService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, test_id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Internal("statistics lock table poisoned".to_string()))?;
        Ok(locks.entry(test_id).or_default().clone())
    }

    /// Full rescan of the test's finalized attempts, one recompute per test at a time.
    pub async fn recompute_statistics(&self, test_id: Uuid) -> Result<TestStatistics> {
        let lock = self.lock_for(test_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.rescan(test_id).await
        };
        drop(lock);
        self.release(test_id);
        result
    }

    async fn rescan(&self, test_id: Uuid) -> Result<TestStatistics> {
        let finalized = self
            .store
            .list_submissions_for_test(
                test_id,
                Some(&[SubmissionStatus::Submitted, SubmissionStatus::Evaluated][..]),
            )
            .await?;
        let stats = compute_statistics(&finalized);
        self.store.save_test_statistics(test_id, &stats).await?;
        Ok(stats)
    }

    /// Drops the test's lock once nobody holds or waits on it.
    fn release(&self, test_id: Uuid) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks
            .get(&test_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&test_id);
        }
    }

    /// Best-effort wrapper used after a finalize: retried with backoff,
    /// failures are only logged.
    pub async fn refresh_statistics(&self, test_id: Uuid) {
        let mut delay = STATISTICS_BACKOFF;
        for attempt in 1..=STATISTICS_ATTEMPTS {
            match self.recompute_statistics(test_id).await {
                Ok(stats) => {
                    tracing::info!(
                        test_id = %test_id,
                        total_attempts = stats.total_attempts,
                        pass_count = stats.pass_count,
                        "test statistics updated"
                    );
                    return;
                }
                Err(err) if attempt < STATISTICS_ATTEMPTS => {
                    tracing::warn!(test_id = %test_id, attempt, error = %err, "statistics update failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    tracing::error!(test_id = %test_id, error = %err, "statistics update gave up");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::question::{CodingQuestion, McqOption, McqQuestion, TestCase};
    use crate::models::test::{TestSettings, TestStatus};
    use crate::models::test_submission::{CodeSubmission, ExecutionMode, McqAnswer};
    use crate::models::question::Language;

    fn mcq(points: i32) -> Question {
        Question::Mcq(McqQuestion {
            id: Uuid::new_v4(),
            title: "q".into(),
            prompt: "?".into(),
            options: vec![
                McqOption { text: "a".into(), is_correct: true },
                McqOption { text: "b".into(), is_correct: false },
            ],
            points,
        })
    }

    fn coding(points: i32) -> Question {
        Question::Coding(CodingQuestion {
            id: Uuid::new_v4(),
            title: "c".into(),
            problem_statement: "p".into(),
            sample_input: String::new(),
            sample_output: String::new(),
            allowed_languages: vec![],
            cpu_limit_secs: None,
            memory_limit_kb: None,
            test_cases: vec![TestCase {
                input: String::new(),
                expected_output: String::new(),
                is_hidden: false,
                points,
            }],
            points,
        })
    }

    fn test_with(questions: Vec<Question>, passing_percentage: i32) -> Test {
        let now = Utc::now();
        Test {
            id: Uuid::new_v4(),
            issuer_id: Uuid::new_v4(),
            title: "t".into(),
            description: None,
            status: TestStatus::Published,
            duration_minutes: 60,
            total_marks: questions.iter().map(Question::points).sum(),
            passing_percentage,
            settings: TestSettings::default(),
            questions,
            statistics: TestStatistics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn answer(q: &Question, index: usize, points_earned: i32) -> McqAnswer {
        McqAnswer {
            question_index: index,
            question_id: q.id(),
            selected_option: 0,
            is_correct: points_earned > 0,
            points_earned,
            answered_at: Utc::now(),
        }
    }

    fn code(q: &Question, index: usize, points_earned: i32) -> CodeSubmission {
        CodeSubmission {
            question_index: index,
            question_id: q.id(),
            language: Language::Python,
            code: String::new(),
            test_case_results: vec![],
            total_passed: 0,
            total_test_cases: 1,
            points_earned,
            execution_mode: ExecutionMode::Judged,
            submitted_at: Utc::now(),
        }
    }

    fn submission(test: &Test) -> TestSubmission {
        let now = Utc::now();
        TestSubmission::new_scheduled(test.id, Uuid::new_v4(), test.issuer_id, now, None, now)
    }

    #[test]
    fn half_marks_on_the_boundary_pass() {
        let test = test_with(vec![mcq(10), mcq(10)], 50);
        let mut sub = submission(&test);
        sub.upsert_mcq_answer(answer(&test.questions[0], 0, 10));
        sub.upsert_mcq_answer(answer(&test.questions[1], 1, 0));

        let scores = compute_scores(&test, &sub);
        assert_eq!(scores.mcq_score, 10);
        assert_eq!(scores.max_score, 20);
        assert_eq!(scores.percentage, 50);
        assert!(scores.passed);
    }

    #[test]
    fn score_never_exceeds_max() {
        let test = test_with(vec![mcq(5), coding(10)], 60);
        let mut sub = submission(&test);
        sub.upsert_mcq_answer(answer(&test.questions[0], 0, 50));
        sub.upsert_code_submission(code(&test.questions[1], 1, 99));

        let scores = compute_scores(&test, &sub);
        assert_eq!(scores.total_score, 15);
        assert!(scores.total_score <= scores.max_score);
        assert_eq!(scores.percentage, 100);
    }

    #[test]
    fn answers_for_removed_questions_are_ignored() {
        let test = test_with(vec![mcq(10)], 50);
        let mut sub = submission(&test);
        sub.upsert_mcq_answer(answer(&mcq(10), 0, 10));
        let scores = compute_scores(&test, &sub);
        assert_eq!(scores.total_score, 0);
        assert!(!scores.passed);
    }

    #[test]
    fn empty_test_scores_zero_percent() {
        let test = test_with(vec![], 0);
        let scores = compute_scores(&test, &submission(&test));
        assert_eq!(scores.percentage, 0);
        assert_eq!(scores.max_score, 0);
    }

    #[test]
    fn statistics_cover_only_finalized_attempts() {
        let test = test_with(vec![mcq(10)], 50);
        let scored = |status, total, passed| {
            let mut s = submission(&test);
            s.status = status;
            s.scores = Some(Scores {
                total_score: total,
                passed,
                ..Scores::default()
            });
            s
        };
        let stats = compute_statistics(&[
            scored(SubmissionStatus::Submitted, 8, true),
            scored(SubmissionStatus::Evaluated, 4, false),
            scored(SubmissionStatus::InProgress, 10, true),
        ]);
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.highest_score, 8);
        assert_eq!(stats.lowest_score, 4);
        assert_eq!(stats.pass_count, 1);
        assert!((stats.average_score - 6.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn recompute_persists_statistics() {
        let store = Arc::new(MemoryStore::new());
        let test = test_with(vec![mcq(10)], 50);
        store.insert_test(&test).await.unwrap();

        let mut sub = submission(&test);
        store.insert_submission(&sub).await.unwrap();
        sub.status = SubmissionStatus::Submitted;
        sub.scores = Some(compute_scores(&test, &sub));
        assert!(store.save_submission(&sub).await.unwrap());

        let service = ScoreService::new(store.clone());
        service.refresh_statistics(test.id).await;

        let stored = store.get_test(test.id).await.unwrap();
        assert_eq!(stored.statistics.total_attempts, 1);
        assert!(stored.statistics.updated_at.is_some());
    }

    #[tokio::test]
    async fn idle_test_locks_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let test = test_with(vec![mcq(10)], 50);
        store.insert_test(&test).await.unwrap();
        let service = ScoreService::new(store);

        let (a, b) = tokio::join!(
            service.recompute_statistics(test.id),
            service.recompute_statistics(test.id)
        );
        a.unwrap();
        b.unwrap();
        assert!(service.locks.lock().unwrap().is_empty());
    }
}
