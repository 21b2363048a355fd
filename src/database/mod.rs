//! Persistence for the two entity collections: tests and test submissions.
//!
//! Both implementations enforce the same rules: one submission per
//! `(test_id, candidate_id)` and version-checked submission writes.

pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::test::{Test, TestStatistics, TestStatus};
use crate::models::test_submission::{SubmissionStatus, TestSubmission};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_test(&self, test: &Test) -> Result<()>;

    async fn get_test(&self, id: Uuid) -> Result<Test>;

    /// Overwrites the definition of a test. Statistics are left untouched.
    async fn update_test(&self, test: &Test) -> Result<()>;

    async fn delete_test(&self, id: Uuid) -> Result<bool>;

    async fn list_tests(
        &self,
        issuer_id: Uuid,
        status: Option<TestStatus>,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Test>, i64)>;

    async fn save_test_statistics(&self, test_id: Uuid, stats: &TestStatistics) -> Result<()>;

    /// Fails with `Error::Conflict` when the candidate already has a
    /// submission for the test.
    async fn insert_submission(&self, submission: &TestSubmission) -> Result<()>;

    async fn get_submission(&self, id: Uuid) -> Result<TestSubmission>;

    /// Compare-and-swap write. Succeeds only if the stored version still
    /// equals `submission.version`; the stored copy then carries version + 1.
    /// Returns `false` when another writer got there first.
    async fn save_submission(&self, submission: &TestSubmission) -> Result<bool>;

    async fn list_submissions_for_test(
        &self,
        test_id: Uuid,
        statuses: Option<&[SubmissionStatus]>,
    ) -> Result<Vec<TestSubmission>>;

    async fn list_submissions_for_candidate(
        &self,
        candidate_id: Uuid,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<TestSubmission>>;

    async fn count_submissions_for_test(&self, test_id: Uuid) -> Result<i64>;

    /// Scheduled submissions whose window lapsed and in-progress submissions
    /// past `started_at + duration`.
    async fn list_overdue_submissions(&self, now: DateTime<Utc>) -> Result<Vec<TestSubmission>>;
}
