use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::question::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Draft,
    Published,
    Archived,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Published => "published",
            TestStatus::Archived => "archived",
        }
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TestStatus::Draft),
            "published" => Ok(TestStatus::Published),
            "archived" => Ok(TestStatus::Archived),
            other => Err(format!("unknown test status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    /// When set, the proctoring monitor may terminate the attempt.
    pub prevent_tab_switch: bool,
    pub show_results_immediately: bool,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            shuffle_questions: false,
            shuffle_options: false,
            prevent_tab_switch: true,
            show_results_immediately: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestStatistics {
    pub total_attempts: i64,
    pub average_score: f64,
    pub highest_score: i32,
    pub lowest_score: i32,
    pub pass_count: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TestStatus,
    pub duration_minutes: i32,
    pub total_marks: i32,
    pub passing_percentage: i32,
    pub settings: TestSettings,
    pub questions: Vec<Question>,
    pub statistics: TestStatistics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Test {
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes as i64)
    }

    pub fn computed_total_marks(&self) -> i32 {
        self.questions.iter().map(Question::points).sum()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn question_by_id(&self, id: Uuid) -> Option<(usize, &Question)> {
        self.questions.iter().enumerate().find(|(_, q)| q.id() == id)
    }

    pub fn is_owned_by(&self, issuer_id: Uuid) -> bool {
        self.issuer_id == issuer_id
    }
}
