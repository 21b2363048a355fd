use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::Store;
use crate::error::{Error, Result};
use crate::models::test::{Test, TestStatistics, TestStatus};
use crate::models::test_submission::{SubmissionStatus, TestSubmission};

#[derive(Default)]
struct Tables {
    tests: HashMap<Uuid, Test>,
    submissions: HashMap<Uuid, TestSubmission>,
    by_test_candidate: HashMap<(Uuid, Uuid), Uuid>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_test(&self, test: &Test) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.tests.contains_key(&test.id) {
            return Err(Error::Conflict(format!("test {} already exists", test.id)));
        }
        tables.tests.insert(test.id, test.clone());
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<Test> {
        self.tables()?
            .tests
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("test {} not found", id)))
    }

    async fn update_test(&self, test: &Test) -> Result<()> {
        let mut tables = self.tables()?;
        let stored = tables
            .tests
            .get_mut(&test.id)
            .ok_or_else(|| Error::NotFound(format!("test {} not found", test.id)))?;
        let statistics = std::mem::take(&mut stored.statistics);
        *stored = Test {
            statistics,
            ..test.clone()
        };
        Ok(())
    }

    async fn delete_test(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables()?;
        if tables.submissions.values().any(|s| s.test_id == id) {
            return Err(Error::Conflict(
                "test has submissions and cannot be deleted".to_string(),
            ));
        }
        Ok(tables.tests.remove(&id).is_some())
    }

    async fn list_tests(
        &self,
        issuer_id: Uuid,
        status: Option<TestStatus>,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Test>, i64)> {
        let tables = self.tables()?;
        let mut tests: Vec<Test> = tables
            .tests
            .values()
            .filter(|t| t.issuer_id == issuer_id)
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = tests.len() as i64;
        let offset = ((page - 1).max(0) * per_page) as usize;
        let items = tests
            .into_iter()
            .skip(offset)
            .take(per_page.max(0) as usize)
            .collect();
        Ok((items, total))
    }

    async fn save_test_statistics(&self, test_id: Uuid, stats: &TestStatistics) -> Result<()> {
        let mut tables = self.tables()?;
        let test = tables
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| Error::NotFound(format!("test {} not found", test_id)))?;
        test.statistics = stats.clone();
        Ok(())
    }

    async fn insert_submission(&self, submission: &TestSubmission) -> Result<()> {
        let mut tables = self.tables()?;
        let key = (submission.test_id, submission.candidate_id);
        if tables.by_test_candidate.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "candidate {} is already scheduled for test {}",
                submission.candidate_id, submission.test_id
            )));
        }
        tables.by_test_candidate.insert(key, submission.id);
        tables.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> Result<TestSubmission> {
        self.tables()?
            .submissions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("submission {} not found", id)))
    }

    async fn save_submission(&self, submission: &TestSubmission) -> Result<bool> {
        let mut tables = self.tables()?;
        let stored = tables
            .submissions
            .get_mut(&submission.id)
            .ok_or_else(|| Error::NotFound(format!("submission {} not found", submission.id)))?;
        if stored.version != submission.version {
            return Ok(false);
        }
        *stored = TestSubmission {
            version: submission.version + 1,
            ..submission.clone()
        };
        Ok(true)
    }

    async fn list_submissions_for_test(
        &self,
        test_id: Uuid,
        statuses: Option<&[SubmissionStatus]>,
    ) -> Result<Vec<TestSubmission>> {
        let tables = self.tables()?;
        let mut items: Vec<TestSubmission> = tables
            .submissions
            .values()
            .filter(|s| s.test_id == test_id)
            .filter(|s| statuses.map(|st| st.contains(&s.status)).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn list_submissions_for_candidate(
        &self,
        candidate_id: Uuid,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<TestSubmission>> {
        let tables = self.tables()?;
        let mut items: Vec<TestSubmission> = tables
            .submissions
            .values()
            .filter(|s| s.candidate_id == candidate_id)
            .filter(|s| status.map(|st| s.status == st).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(items)
    }

    async fn count_submissions_for_test(&self, test_id: Uuid) -> Result<i64> {
        let tables = self.tables()?;
        Ok(tables
            .submissions
            .values()
            .filter(|s| s.test_id == test_id)
            .count() as i64)
    }

    async fn list_overdue_submissions(&self, now: DateTime<Utc>) -> Result<Vec<TestSubmission>> {
        let tables = self.tables()?;
        let overdue = tables
            .submissions
            .values()
            .filter(|s| match s.status {
                SubmissionStatus::Scheduled => s.window_lapsed(now),
                SubmissionStatus::InProgress => tables
                    .tests
                    .get(&s.test_id)
                    .map(|t| s.is_past_deadline(t, now))
                    .unwrap_or(false),
                _ => false,
            })
            .cloned()
            .collect();
        Ok(overdue)
    }
}
