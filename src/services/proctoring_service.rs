use uuid::Uuid;

use crate::dto::submission_dto::ProctoringResponse;
use crate::error::Result;
use crate::models::identity::Identity;
use crate::models::test_submission::{FinalizeTrigger, ProctoringEventType};
use crate::services::attempt_service::AttemptService;

#[derive(Clone)]
pub struct ProctoringService {
    attempts: AttemptService,
    flag_threshold: i32,
    terminate_threshold: i32,
}

impl ProctoringService {
    pub fn new(attempts: AttemptService, flag_threshold: i32, terminate_threshold: i32) -> Self {
        Self {
            attempts,
            flag_threshold,
            terminate_threshold,
        }
    }

    /// Logs an integrity event. Too many tab switches flag the attempt, and,
    /// when the test forbids tab switching, end it.
    pub async fn record_event(
        &self,
        submission_id: Uuid,
        actor: &Identity,
        event_type: ProctoringEventType,
    ) -> Result<ProctoringResponse> {
        let (submission, test) = self.attempts.load_owned(submission_id, actor).await?;
        let open = AttemptService::check_open(&submission, &test, self.attempts.now());
        self.attempts.reject_late(submission_id, &test, open).await?;

        let flag_threshold = self.flag_threshold;
        let result = self
            .attempts
            .mutate(submission_id, |s| {
                let now = self.attempts.now();
                AttemptService::check_open(s, &test, now)?;
                let record = &mut s.proctoring;
                record.record(event_type, now);
                let newly_flagged = !record.flagged && record.tab_switch_count >= flag_threshold;
                if newly_flagged {
                    record.flagged = true;
                    record.flag_reason = Some(format!(
                        "switched tabs {} times",
                        record.tab_switch_count
                    ));
                }
                s.updated_at = now;
                Ok(newly_flagged)
            })
            .await;
        let (updated, newly_flagged) = self.attempts.reject_late(submission_id, &test, result).await?;

        let record = &updated.proctoring;
        let terminated = test.settings.prevent_tab_switch
            && event_type == ProctoringEventType::TabSwitch
            && record.tab_switch_count >= self.terminate_threshold;

        if newly_flagged {
            tracing::warn!(
                submission_id = %submission_id,
                tab_switch_count = record.tab_switch_count,
                "attempt flagged by proctoring"
            );
        }
        if terminated {
            tracing::warn!(submission_id = %submission_id, "terminating attempt after repeated tab switches");
            self.attempts
                .finalize_as(submission_id, FinalizeTrigger::Proctoring)
                .await?;
        }

        Ok(ProctoringResponse {
            tab_switch_count: record.tab_switch_count,
            flagged: record.flagged,
            terminated,
        })
    }
}
