use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::Store;
use crate::error::{Error, Result};
use crate::models::question::Question;
use crate::models::test::{Test, TestSettings, TestStatistics, TestStatus};
use crate::models::test_submission::{
    CodeSubmission, McqAnswer, ProctoringRecord, Scores, SubmissionStatus, TestSubmission,
};

const TEST_COLUMNS: &str = r#"
    id, issuer_id, title, description, status, duration_minutes, total_marks,
    passing_percentage, settings, questions, statistics, created_at, updated_at
"#;

const SUBMISSION_COLUMNS: &str = r#"
    id, test_id, candidate_id, scheduler_id, status, version, scheduled_at, expires_at,
    started_at, submitted_at, time_spent_seconds, finalize_trigger, mcq_answers,
    code_submissions, scores, proctoring, review_notes, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct TestRow {
    id: Uuid,
    issuer_id: Uuid,
    title: String,
    description: Option<String>,
    status: String,
    duration_minutes: i32,
    total_marks: i32,
    passing_percentage: i32,
    settings: Json<TestSettings>,
    questions: Json<Vec<Question>>,
    statistics: Json<TestStatistics>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TestRow> for Test {
    type Error = Error;

    fn try_from(row: TestRow) -> Result<Self> {
        Ok(Test {
            id: row.id,
            issuer_id: row.issuer_id,
            title: row.title,
            description: row.description,
            status: row.status.parse().map_err(Error::Internal)?,
            duration_minutes: row.duration_minutes,
            total_marks: row.total_marks,
            passing_percentage: row.passing_percentage,
            settings: row.settings.0,
            questions: row.questions.0,
            statistics: row.statistics.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubmissionRow {
    id: Uuid,
    test_id: Uuid,
    candidate_id: Uuid,
    scheduler_id: Uuid,
    status: String,
    version: i64,
    scheduled_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    time_spent_seconds: Option<i64>,
    finalize_trigger: Option<String>,
    mcq_answers: Json<Vec<McqAnswer>>,
    code_submissions: Json<Vec<CodeSubmission>>,
    scores: Option<Json<Scores>>,
    proctoring: Json<ProctoringRecord>,
    review_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for TestSubmission {
    type Error = Error;

    fn try_from(row: SubmissionRow) -> Result<Self> {
        let finalize_trigger = match row.finalize_trigger {
            Some(raw) => Some(raw.parse().map_err(Error::Internal)?),
            None => None,
        };
        Ok(TestSubmission {
            id: row.id,
            test_id: row.test_id,
            candidate_id: row.candidate_id,
            scheduler_id: row.scheduler_id,
            status: row.status.parse().map_err(Error::Internal)?,
            version: row.version,
            scheduled_at: row.scheduled_at,
            expires_at: row.expires_at,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            time_spent_seconds: row.time_spent_seconds,
            finalize_trigger,
            mcq_answers: row.mcq_answers.0,
            code_submissions: row.code_submissions.0,
            scores: row.scores.map(|s| s.0),
            proctoring: row.proctoring.0,
            review_notes: row.review_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_submissions(rows: Vec<SubmissionRow>) -> Result<Vec<TestSubmission>> {
    rows.into_iter().map(TestSubmission::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_test(&self, test: &Test) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tests (
                id, issuer_id, title, description, status, duration_minutes, total_marks,
                passing_percentage, settings, questions, statistics, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(test.id)
        .bind(test.issuer_id)
        .bind(&test.title)
        .bind(&test.description)
        .bind(test.status.as_str())
        .bind(test.duration_minutes)
        .bind(test.total_marks)
        .bind(test.passing_percentage)
        .bind(Json(&test.settings))
        .bind(Json(&test.questions))
        .bind(Json(&test.statistics))
        .bind(test.created_at)
        .bind(test.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<Test> {
        let row = sqlx::query_as::<_, TestRow>(&format!(
            "SELECT {} FROM tests WHERE id = $1",
            TEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("test {} not found", id)))?;
        row.try_into()
    }

    async fn update_test(&self, test: &Test) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tests
            SET title = $2, description = $3, status = $4, duration_minutes = $5,
                total_marks = $6, passing_percentage = $7, settings = $8, questions = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(test.id)
        .bind(&test.title)
        .bind(&test.description)
        .bind(test.status.as_str())
        .bind(test.duration_minutes)
        .bind(test.total_marks)
        .bind(test.passing_percentage)
        .bind(Json(&test.settings))
        .bind(Json(&test.questions))
        .bind(test.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("test {} not found", test.id)));
        }
        Ok(())
    }

    async fn delete_test(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => Error::Conflict(
                    "test has submissions and cannot be deleted".to_string(),
                ),
                other => Error::from(other),
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tests(
        &self,
        issuer_id: Uuid,
        status: Option<TestStatus>,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Test>, i64)> {
        let offset = (page - 1).max(0) * per_page;
        let status_param = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM tests
               WHERE issuer_id = $1 AND ($2::text IS NULL OR status = $2)"#,
        )
        .bind(issuer_id)
        .bind(status_param)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, TestRow>(&format!(
            r#"SELECT {} FROM tests
               WHERE issuer_id = $1 AND ($2::text IS NULL OR status = $2)
               ORDER BY created_at DESC
               LIMIT $3 OFFSET $4"#,
            TEST_COLUMNS
        ))
        .bind(issuer_id)
        .bind(status_param)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let tests = rows
            .into_iter()
            .map(Test::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((tests, total))
    }

    async fn save_test_statistics(&self, test_id: Uuid, stats: &TestStatistics) -> Result<()> {
        sqlx::query("UPDATE tests SET statistics = $2 WHERE id = $1")
            .bind(test_id)
            .bind(Json(stats))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_submission(&self, submission: &TestSubmission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO test_submissions (
                id, test_id, candidate_id, scheduler_id, status, version, scheduled_at,
                expires_at, mcq_answers, code_submissions, proctoring, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(submission.id)
        .bind(submission.test_id)
        .bind(submission.candidate_id)
        .bind(submission.scheduler_id)
        .bind(submission.status.as_str())
        .bind(submission.version)
        .bind(submission.scheduled_at)
        .bind(submission.expires_at)
        .bind(Json(&submission.mcq_answers))
        .bind(Json(&submission.code_submissions))
        .bind(Json(&submission.proctoring))
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(format!(
                "candidate {} is already scheduled for test {}",
                submission.candidate_id, submission.test_id
            )),
            other => Error::from(other),
        })?;
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> Result<TestSubmission> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM test_submissions WHERE id = $1",
            SUBMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("submission {} not found", id)))?;
        row.try_into()
    }

    async fn save_submission(&self, submission: &TestSubmission) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE test_submissions
            SET status = $3, version = version + 1, started_at = $4, submitted_at = $5,
                time_spent_seconds = $6, finalize_trigger = $7, mcq_answers = $8,
                code_submissions = $9, scores = $10, proctoring = $11, review_notes = $12,
                updated_at = $13
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(submission.id)
        .bind(submission.version)
        .bind(submission.status.as_str())
        .bind(submission.started_at)
        .bind(submission.submitted_at)
        .bind(submission.time_spent_seconds)
        .bind(submission.finalize_trigger.map(|t| t.as_str()))
        .bind(Json(&submission.mcq_answers))
        .bind(Json(&submission.code_submissions))
        .bind(submission.scores.as_ref().map(Json))
        .bind(Json(&submission.proctoring))
        .bind(&submission.review_notes)
        .bind(submission.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_submissions_for_test(
        &self,
        test_id: Uuid,
        statuses: Option<&[SubmissionStatus]>,
    ) -> Result<Vec<TestSubmission>> {
        let status_param: Option<Vec<String>> =
            statuses.map(|st| st.iter().map(|s| s.as_str().to_string()).collect());
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            r#"SELECT {} FROM test_submissions
               WHERE test_id = $1 AND ($2::text[] IS NULL OR status = ANY($2))
               ORDER BY created_at ASC"#,
            SUBMISSION_COLUMNS
        ))
        .bind(test_id)
        .bind(status_param)
        .fetch_all(&self.pool)
        .await?;
        into_submissions(rows)
    }

    async fn list_submissions_for_candidate(
        &self,
        candidate_id: Uuid,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<TestSubmission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            r#"SELECT {} FROM test_submissions
               WHERE candidate_id = $1 AND ($2::text IS NULL OR status = $2)
               ORDER BY scheduled_at DESC"#,
            SUBMISSION_COLUMNS
        ))
        .bind(candidate_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        into_submissions(rows)
    }

    async fn count_submissions_for_test(&self, test_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM test_submissions WHERE test_id = $1")
                .bind(test_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_overdue_submissions(&self, now: DateTime<Utc>) -> Result<Vec<TestSubmission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            r#"SELECT {} FROM test_submissions s
               WHERE (s.status = 'scheduled' AND s.expires_at IS NOT NULL AND s.expires_at < $1)
                  OR (s.status = 'in_progress' AND EXISTS (
                        SELECT 1 FROM tests t
                        WHERE t.id = s.test_id
                          AND s.started_at + make_interval(mins => t.duration_minutes) < $1
                  ))"#,
            SUBMISSION_COLUMNS
                .split(',')
                .map(|c| format!("s.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        into_submissions(rows)
    }
}
