use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::database::Store;
use crate::dto::test_dto::{CreateTestPayload, ListTestsQuery, PaginatedTests, UpdateTestPayload};
use crate::error::{Error, Result};
use crate::models::identity::Identity;
use crate::models::question::Question;
use crate::models::test::{Test, TestStatistics, TestStatus};

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

#[derive(Clone)]
pub struct TestService {
    store: Arc<dyn Store>,
}

impl TestService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_test(&self, actor: &Identity, payload: CreateTestPayload) -> Result<Test> {
        payload.validate()?;
        let mut questions = payload.questions;
        for q in questions.iter_mut() {
            q.set_id(Uuid::new_v4());
        }
        validate_questions(&questions)?;

        let now = Utc::now();
        let mut test = Test {
            id: Uuid::new_v4(),
            issuer_id: actor.user_id,
            title: payload.title.trim().to_string(),
            description: payload.description,
            status: TestStatus::Draft,
            duration_minutes: payload.duration_minutes,
            total_marks: 0,
            passing_percentage: payload.passing_percentage,
            settings: payload.settings,
            questions,
            statistics: TestStatistics::default(),
            created_at: now,
            updated_at: now,
        };
        test.total_marks = test.computed_total_marks();

        self.store.insert_test(&test).await?;
        tracing::info!(test_id = %test.id, issuer_id = %test.issuer_id, questions = test.questions.len(), "test created");
        Ok(test)
    }

    pub async fn get_test(&self, actor: &Identity, test_id: Uuid) -> Result<Test> {
        let test = self.store.get_test(test_id).await?;
        ensure_owner(actor, &test)?;
        Ok(test)
    }

    pub async fn list_tests(&self, actor: &Identity, query: ListTestsQuery) -> Result<PaginatedTests> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        let (tests, total) = self
            .store
            .list_tests(actor.user_id, query.status, page, per_page)
            .await?;
        let total_pages = (total + per_page - 1) / per_page;
        Ok(PaginatedTests {
            tests,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    pub async fn update_test(
        &self,
        actor: &Identity,
        test_id: Uuid,
        payload: UpdateTestPayload,
    ) -> Result<Test> {
        payload.validate()?;
        let mut test = self.store.get_test(test_id).await?;
        ensure_owner(actor, &test)?;
        if test.status == TestStatus::Archived {
            return Err(Error::Conflict("archived tests are read-only".to_string()));
        }

        if let Some(title) = payload.title {
            test.title = title;
        }
        if payload.description.is_some() {
            test.description = payload.description;
        }
        if let Some(duration) = payload.duration_minutes {
            test.duration_minutes = duration;
        }
        if let Some(passing) = payload.passing_percentage {
            test.passing_percentage = passing;
        }
        if let Some(settings) = payload.settings {
            test.settings = settings;
        }
        if let Some(questions) = payload.questions {
            let has_submissions = self.store.count_submissions_for_test(test.id).await? > 0;
            test.questions = merge_questions(&test.questions, questions, has_submissions)?;
            validate_questions(&test.questions)?;
            if test.status == TestStatus::Published && test.questions.is_empty() {
                return Err(Error::Validation(
                    "a published test needs at least one question".to_string(),
                ));
            }
        }

        test.total_marks = test.computed_total_marks();
        test.updated_at = Utc::now();
        self.store.update_test(&test).await?;
        tracing::info!(test_id = %test.id, "test updated");
        Ok(test)
    }

    pub async fn delete_test(&self, actor: &Identity, test_id: Uuid) -> Result<()> {
        let test = self.store.get_test(test_id).await?;
        ensure_owner(actor, &test)?;
        if self.store.count_submissions_for_test(test_id).await? > 0 {
            return Err(Error::Conflict(
                "test has submissions; archive it instead".to_string(),
            ));
        }
        if !self.store.delete_test(test_id).await? {
            return Err(Error::NotFound(format!("test {} not found", test_id)));
        }
        tracing::info!(test_id = %test_id, "test deleted");
        Ok(())
    }

    pub async fn publish_test(&self, actor: &Identity, test_id: Uuid) -> Result<Test> {
        let mut test = self.store.get_test(test_id).await?;
        ensure_owner(actor, &test)?;
        match test.status {
            TestStatus::Published => return Ok(test),
            TestStatus::Archived => {
                return Err(Error::Conflict("archived tests cannot be published".to_string()))
            }
            TestStatus::Draft => {}
        }
        if test.questions.is_empty() {
            return Err(Error::Validation(
                "a test needs at least one question before publishing".to_string(),
            ));
        }
        test.status = TestStatus::Published;
        test.updated_at = Utc::now();
        self.store.update_test(&test).await?;
        tracing::info!(test_id = %test.id, "test published");
        Ok(test)
    }

    pub async fn archive_test(&self, actor: &Identity, test_id: Uuid) -> Result<Test> {
        let mut test = self.store.get_test(test_id).await?;
        ensure_owner(actor, &test)?;
        if test.status != TestStatus::Archived {
            test.status = TestStatus::Archived;
            test.updated_at = Utc::now();
            self.store.update_test(&test).await?;
            tracing::info!(test_id = %test.id, "test archived");
        }
        Ok(test)
    }
}

pub fn ensure_owner(actor: &Identity, test: &Test) -> Result<()> {
    if actor.can_manage(test.issuer_id) {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!(
            "test {} belongs to another issuer",
            test.id
        )))
    }
}

fn validate_questions(questions: &[Question]) -> Result<()> {
    for (position, q) in questions.iter().enumerate() {
        q.validate(position).map_err(Error::Validation)?;
    }
    Ok(())
}

/// Applies an edited question list on top of the stored one.
///
/// Incoming questions without an id get a fresh one; questions with an id
/// must refer to a question of this test and keep its type. Once candidates
/// have attempted the test, every existing id has to stay at its position.
fn merge_questions(
    existing: &[Question],
    mut incoming: Vec<Question>,
    has_submissions: bool,
) -> Result<Vec<Question>> {
    let mut seen = HashSet::new();
    for (position, q) in incoming.iter_mut().enumerate() {
        if q.id().is_nil() {
            q.set_id(Uuid::new_v4());
        } else {
            match existing.iter().find(|e| e.id() == q.id()) {
                Some(stored) if stored.kind() != q.kind() => {
                    return Err(Error::Validation(format!(
                        "question {} cannot change type from {} to {}",
                        position,
                        stored.kind(),
                        q.kind()
                    )))
                }
                Some(_) => {}
                None => {
                    return Err(Error::Validation(format!(
                        "question {} refers to unknown id {}",
                        position,
                        q.id()
                    )))
                }
            }
        }
        if !seen.insert(q.id()) {
            return Err(Error::Validation(format!(
                "question id {} appears more than once",
                q.id()
            )));
        }
    }

    if has_submissions {
        for (position, stored) in existing.iter().enumerate() {
            if incoming.get(position).map(Question::id) != Some(stored.id()) {
                return Err(Error::Conflict(format!(
                    "question {} cannot be moved or removed once candidates have attempted the test",
                    position
                )));
            }
        }
    }
    Ok(incoming)
}
