pub mod attempt_service;
pub mod eligibility_service;
pub mod grading_service;
pub mod notification_service;
pub mod proctoring_service;
pub mod report_service;
pub mod sandbox_service;
pub mod scheduler_service;
pub mod score_service;
pub mod test_service;
