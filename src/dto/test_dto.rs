use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::question::Question;
use crate::models::test::{Test, TestSettings, TestStatus};

/// `total_marks` is not accepted from clients; it is always derived from the questions.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTestPayload {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub description: Option<String>,
    #[validate(range(min = 1, max = 1440, message = "Duration must be between 1 and 1440 minutes"))]
    pub duration_minutes: i32,
    #[validate(range(min = 0, max = 100, message = "Passing percentage must be between 0 and 100"))]
    pub passing_percentage: i32,
    #[serde(default)]
    pub settings: TestSettings,
    #[serde(default)]
    #[validate(length(max = 200, message = "A test holds at most 200 questions"))]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTestPayload {
    #[serde(default, deserialize_with = "trim_optional_string")]
    #[validate(length(max = 200, message = "Title must be at most 200 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "trim_optional_string")]
    pub description: Option<String>,

    #[validate(range(min = 1, max = 1440, message = "Duration must be between 1 and 1440 minutes"))]
    pub duration_minutes: Option<i32>,

    #[validate(range(min = 0, max = 100, message = "Passing percentage must be between 0 and 100"))]
    pub passing_percentage: Option<i32>,

    pub settings: Option<TestSettings>,

    #[validate(length(max = 200, message = "A test holds at most 200 questions"))]
    pub questions: Option<Vec<Question>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTestsQuery {
    pub status: Option<TestStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedTests {
    #[serde(rename = "items")]
    pub tests: Vec<Test>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

// Trims strings and turns blank ones into None
fn trim_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_title_is_dropped_from_updates() {
        let payload: UpdateTestPayload = serde_json::from_value(json!({
            "title": "   ",
            "duration_minutes": 45
        }))
        .unwrap();
        assert!(payload.title.is_none());
        assert_eq!(payload.duration_minutes, Some(45));
    }

    #[test]
    fn client_total_marks_is_ignored() {
        let payload: CreateTestPayload = serde_json::from_value(json!({
            "title": "Rust basics",
            "duration_minutes": 30,
            "passing_percentage": 60,
            "total_marks": 9999,
            "questions": []
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
        assert!(payload.settings.prevent_tab_switch);
    }

    #[test]
    fn out_of_range_percentage_fails_validation() {
        let payload: CreateTestPayload = serde_json::from_value(json!({
            "title": "Rust basics",
            "duration_minutes": 30,
            "passing_percentage": 140
        }))
        .unwrap();
        assert!(payload.validate().is_err());
    }
}
