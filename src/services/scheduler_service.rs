use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::database::Store;
use crate::dto::submission_dto::AssignTestPayload;
use crate::error::{Error, Result};
use crate::models::identity::Identity;
use crate::models::test::TestStatus;
use crate::models::test_submission::TestSubmission;
use crate::services::eligibility_service::EligibilityCheck;
use crate::services::notification_service::{Notification, NotificationService};
use crate::services::test_service::ensure_owner;
use crate::utils::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentFailureReason {
    NotEligible,
    EligibilityUnavailable,
    AlreadyScheduled,
    StoreError,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentFailure {
    pub candidate_id: Uuid,
    pub reason: AssignmentFailureReason,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentResult {
    pub success_count: usize,
    pub submission_ids: Vec<Uuid>,
    pub failures: Vec<AssignmentFailure>,
}

#[derive(Clone)]
pub struct SchedulerService {
    store: Arc<dyn Store>,
    eligibility: Arc<dyn EligibilityCheck>,
    notifications: NotificationService,
    clock: Arc<dyn Clock>,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn Store>,
        eligibility: Arc<dyn EligibilityCheck>,
        notifications: NotificationService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            eligibility,
            notifications,
            clock,
        }
    }

    /// Schedules the test for each candidate. Per-candidate problems are
    /// reported in `failures` and never abort the rest of the batch.
    pub async fn assign_test(
        &self,
        actor: &Identity,
        payload: AssignTestPayload,
    ) -> Result<AssignmentResult> {
        payload.validate()?;
        let test = self.store.get_test(payload.test_id).await?;
        ensure_owner(actor, &test)?;
        if test.status != TestStatus::Published {
            return Err(Error::Conflict(format!(
                "only published tests can be assigned (test is {})",
                test.status.as_str()
            )));
        }

        let now = self.clock.now();
        let scheduled_at = payload.scheduled_at.unwrap_or(now);
        validate_window(scheduled_at, payload.expires_at)?;

        let mut candidates = payload.candidate_ids;
        candidates.sort();
        candidates.dedup();

        let mut result = AssignmentResult::default();
        for candidate_id in candidates {
            match self.eligibility.is_eligible(candidate_id, test.id).await {
                Ok(true) => {}
                Ok(false) => {
                    result.failures.push(AssignmentFailure {
                        candidate_id,
                        reason: AssignmentFailureReason::NotEligible,
                        message: "candidate is not eligible for this test".to_string(),
                    });
                    continue;
                }
                Err(err) => {
                    tracing::warn!(candidate_id = %candidate_id, error = %err, "eligibility lookup failed");
                    result.failures.push(AssignmentFailure {
                        candidate_id,
                        reason: AssignmentFailureReason::EligibilityUnavailable,
                        message: err.to_string(),
                    });
                    continue;
                }
            }

            let submission = TestSubmission::new_scheduled(
                test.id,
                candidate_id,
                actor.user_id,
                scheduled_at,
                payload.expires_at,
                now,
            );
            match self.store.insert_submission(&submission).await {
                Ok(()) => {
                    result.success_count += 1;
                    result.submission_ids.push(submission.id);
                    self.notifications.dispatch(Notification::new(
                        "test_assigned",
                        candidate_id,
                        json!({
                            "submission_id": submission.id,
                            "test_id": test.id,
                            "test_title": test.title,
                            "scheduled_at": scheduled_at,
                            "expires_at": payload.expires_at,
                            "duration_minutes": test.duration_minutes,
                        }),
                    ));
                }
                Err(Error::Conflict(message)) => result.failures.push(AssignmentFailure {
                    candidate_id,
                    reason: AssignmentFailureReason::AlreadyScheduled,
                    message,
                }),
                Err(err) => {
                    tracing::error!(candidate_id = %candidate_id, error = %err, "could not schedule candidate");
                    result.failures.push(AssignmentFailure {
                        candidate_id,
                        reason: AssignmentFailureReason::StoreError,
                        message: "submission could not be stored".to_string(),
                    });
                }
            }
        }

        tracing::info!(
            test_id = %test.id,
            scheduled = result.success_count,
            failed = result.failures.len(),
            "test assigned"
        );
        Ok(result)
    }
}

fn validate_window(scheduled_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Result<()> {
    match expires_at {
        Some(expires) if expires <= scheduled_at => Err(Error::Validation(
            "expires_at must be after scheduled_at".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::identity::Role;
    use crate::models::question::{McqOption, McqQuestion, Question};
    use crate::models::test::{Test, TestSettings, TestStatistics};
    use crate::services::eligibility_service::AllowAllEligibility;
    use crate::services::notification_service::LogNotifier;
    use crate::utils::time::SystemClock;
    use async_trait::async_trait;
    use chrono::Duration;

    struct DenyList {
        denied: Uuid,
        broken: Uuid,
    }

    #[async_trait]
    impl EligibilityCheck for DenyList {
        async fn is_eligible(&self, candidate_id: Uuid, _test_id: Uuid) -> Result<bool> {
            if candidate_id == self.broken {
                return Err(Error::Internal("lookup timed out".into()));
            }
            Ok(candidate_id != self.denied)
        }
    }

    async fn published_test(store: &MemoryStore, issuer: &Identity, status: TestStatus) -> Test {
        let now = Utc::now();
        let test = Test {
            id: Uuid::new_v4(),
            issuer_id: issuer.user_id,
            title: "Screening".into(),
            description: None,
            status,
            duration_minutes: 30,
            total_marks: 5,
            passing_percentage: 50,
            settings: TestSettings::default(),
            questions: vec![Question::Mcq(McqQuestion {
                id: Uuid::new_v4(),
                title: "q".into(),
                prompt: "?".into(),
                options: vec![
                    McqOption { text: "a".into(), is_correct: true },
                    McqOption { text: "b".into(), is_correct: false },
                ],
                points: 5,
            })],
            statistics: TestStatistics::default(),
            created_at: now,
            updated_at: now,
        };
        store.insert_test(&test).await.unwrap();
        test
    }

    fn scheduler(store: Arc<MemoryStore>, eligibility: Arc<dyn EligibilityCheck>) -> SchedulerService {
        SchedulerService::new(
            store,
            eligibility,
            NotificationService::new(Arc::new(LogNotifier)),
            Arc::new(SystemClock),
        )
    }

    fn payload(test_id: Uuid, candidate_ids: Vec<Uuid>) -> AssignTestPayload {
        AssignTestPayload {
            test_id,
            candidate_ids,
            scheduled_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn repeating_an_assignment_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let issuer = Identity::new(Uuid::new_v4(), Role::Issuer);
        let test = published_test(&store, &issuer, TestStatus::Published).await;
        let service = scheduler(store.clone(), Arc::new(AllowAllEligibility));
        let candidates: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        let first = service
            .assign_test(&issuer, payload(test.id, candidates.clone()))
            .await
            .unwrap();
        assert_eq!(first.success_count, 3);

        let second = service
            .assign_test(&issuer, payload(test.id, candidates))
            .await
            .unwrap();
        assert_eq!(second.success_count, 0);
        assert_eq!(second.failures.len(), 3);
        assert!(second
            .failures
            .iter()
            .all(|f| f.reason == AssignmentFailureReason::AlreadyScheduled));
        assert_eq!(store.count_submissions_for_test(test.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn eligibility_failures_do_not_abort_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let issuer = Identity::new(Uuid::new_v4(), Role::Issuer);
        let test = published_test(&store, &issuer, TestStatus::Published).await;
        let denied = Uuid::new_v4();
        let broken = Uuid::new_v4();
        let ok = Uuid::new_v4();
        let service = scheduler(store.clone(), Arc::new(DenyList { denied, broken }));

        let result = service
            .assign_test(&issuer, payload(test.id, vec![denied, broken, ok]))
            .await
            .unwrap();
        assert_eq!(result.success_count, 1);
        let reason_for = |id| result.failures.iter().find(|f| f.candidate_id == id).map(|f| f.reason);
        assert_eq!(reason_for(denied), Some(AssignmentFailureReason::NotEligible));
        assert_eq!(reason_for(broken), Some(AssignmentFailureReason::EligibilityUnavailable));
    }

    #[tokio::test]
    async fn draft_tests_cannot_be_assigned() {
        let store = Arc::new(MemoryStore::new());
        let issuer = Identity::new(Uuid::new_v4(), Role::Issuer);
        let test = published_test(&store, &issuer, TestStatus::Draft).await;
        let service = scheduler(store.clone(), Arc::new(AllowAllEligibility));
        let err = service
            .assign_test(&issuer, payload(test.id, vec![Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.count_submissions_for_test(test.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn window_must_end_after_it_starts() {
        let store = Arc::new(MemoryStore::new());
        let issuer = Identity::new(Uuid::new_v4(), Role::Issuer);
        let test = published_test(&store, &issuer, TestStatus::Published).await;
        let service = scheduler(store, Arc::new(AllowAllEligibility));
        let now = Utc::now();
        let err = service
            .assign_test(
                &issuer,
                AssignTestPayload {
                    scheduled_at: Some(now),
                    expires_at: Some(now - Duration::hours(1)),
                    ..payload(test.id, vec![Uuid::new_v4()])
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn foreign_issuer_is_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let owner = Identity::new(Uuid::new_v4(), Role::Issuer);
        let test = published_test(&store, &owner, TestStatus::Published).await;
        let service = scheduler(store, Arc::new(AllowAllEligibility));
        let other = Identity::new(Uuid::new_v4(), Role::Issuer);
        let err = service
            .assign_test(&other, payload(test.id, vec![Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }
}
