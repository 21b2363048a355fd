use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bounds accepted for per-question sandbox limits.
pub const MAX_CPU_LIMIT_SECS: f64 = 15.0;
pub const MAX_MEMORY_LIMIT_KB: u64 = 512_000;

/// A single question of a test. The list position is the public
/// `question_index`; `id` is stable across edits and is what answers are
/// scored against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Question {
    Mcq(McqQuestion),
    Coding(CodingQuestion),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqQuestion {
    #[serde(default)]
    pub id: Uuid,
    pub title: String,
    pub prompt: String,
    pub options: Vec<McqOption>,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqOption {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingQuestion {
    #[serde(default)]
    pub id: Uuid,
    pub title: String,
    pub problem_statement: String,
    #[serde(default)]
    pub sample_input: String,
    #[serde(default)]
    pub sample_output: String,
    /// Empty means every supported language is accepted.
    #[serde(default)]
    pub allowed_languages: Vec<Language>,
    #[serde(default)]
    pub cpu_limit_secs: Option<f64>,
    #[serde(default)]
    pub memory_limit_kb: Option<u64>,
    pub test_cases: Vec<TestCase>,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
    pub points: i32,
}

impl Question {
    pub fn id(&self) -> Uuid {
        match self {
            Question::Mcq(q) => q.id,
            Question::Coding(q) => q.id,
        }
    }

    pub fn set_id(&mut self, id: Uuid) {
        match self {
            Question::Mcq(q) => q.id = id,
            Question::Coding(q) => q.id = id,
        }
    }

    pub fn points(&self) -> i32 {
        match self {
            Question::Mcq(q) => q.points,
            Question::Coding(q) => q.points,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Question::Mcq(q) => &q.title,
            Question::Coding(q) => &q.title,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Question::Mcq(_) => "mcq",
            Question::Coding(_) => "coding",
        }
    }

    /// Checks the per-question invariants. `position` is only used for messages.
    pub fn validate(&self, position: usize) -> Result<(), String> {
        if self.points() <= 0 {
            return Err(format!("question {} must be worth at least 1 point", position));
        }
        if self.title().trim().is_empty() {
            return Err(format!("question {} needs a title", position));
        }
        match self {
            Question::Mcq(q) => {
                if q.options.len() < 2 {
                    return Err(format!("question {} needs at least two options", position));
                }
                if !q.options.iter().any(|o| o.is_correct) {
                    return Err(format!("question {} has no correct option", position));
                }
            }
            Question::Coding(q) => {
                if q.test_cases.is_empty() {
                    return Err(format!("question {} needs at least one test case", position));
                }
                if q.test_cases.iter().any(|tc| tc.points < 0) {
                    return Err(format!(
                        "question {} has a test case with negative points",
                        position
                    ));
                }
                if let Some(cpu) = q.cpu_limit_secs {
                    if !cpu.is_finite() || cpu <= 0.0 || cpu > MAX_CPU_LIMIT_SECS {
                        return Err(format!(
                            "question {} has a CPU limit outside (0, {}] seconds",
                            position, MAX_CPU_LIMIT_SECS
                        ));
                    }
                }
                if let Some(memory) = q.memory_limit_kb {
                    if memory == 0 || memory > MAX_MEMORY_LIMIT_KB {
                        return Err(format!(
                            "question {} has a memory limit outside 1..={} KB",
                            position, MAX_MEMORY_LIMIT_KB
                        ));
                    }
                }
                let case_points: i32 = q.test_cases.iter().map(|tc| tc.points).sum();
                if case_points != q.points {
                    return Err(format!(
                        "question {} is worth {} points but its test cases add up to {}",
                        position, q.points, case_points
                    ));
                }
            }
        }
        Ok(())
    }
}

impl CodingQuestion {
    pub fn accepts(&self, language: Language) -> bool {
        self.allowed_languages.is_empty() || self.allowed_languages.contains(&language)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Java,
    Cpp,
    C,
    Go,
    Rust,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            "typescript" | "ts" => Ok(Language::Typescript),
            "java" => Ok(Language::Java),
            "cpp" | "c++" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            "go" | "golang" => Ok(Language::Go),
            "rust" | "rs" => Ok(Language::Rust),
            other => Err(format!("unsupported language '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coding(points: i32, case_points: &[i32]) -> Question {
        Question::Coding(CodingQuestion {
            id: Uuid::nil(),
            title: "Sum".into(),
            problem_statement: "Add two numbers".into(),
            sample_input: "1 2".into(),
            sample_output: "3".into(),
            allowed_languages: vec![],
            cpu_limit_secs: None,
            memory_limit_kb: None,
            test_cases: case_points
                .iter()
                .map(|p| TestCase {
                    input: "1 2".into(),
                    expected_output: "3".into(),
                    is_hidden: false,
                    points: *p,
                })
                .collect(),
            points,
        })
    }

    #[test]
    fn deserializes_tagged_mcq_without_id() {
        let q: Question = serde_json::from_value(json!({
            "type": "mcq",
            "title": "Arithmetic",
            "prompt": "2+2?",
            "options": [{"text": "3"}, {"text": "4", "is_correct": true}],
            "points": 5
        }))
        .unwrap();
        assert_eq!(q.id(), Uuid::nil());
        assert_eq!(q.points(), 5);
        assert!(q.validate(0).is_ok());
    }

    #[test]
    fn coding_case_points_must_add_up() {
        assert!(coding(10, &[5, 5]).validate(0).is_ok());
        let err = coding(10, &[5, 4]).validate(2).unwrap_err();
        assert!(err.contains("question 2"));
    }

    #[test]
    fn sandbox_limits_must_be_sane() {
        let with_limits = |cpu: Option<f64>, memory: Option<u64>| {
            let mut q = coding(10, &[10]);
            if let Question::Coding(c) = &mut q {
                c.cpu_limit_secs = cpu;
                c.memory_limit_kb = memory;
            }
            q.validate(1)
        };
        assert!(with_limits(Some(2.5), Some(256_000)).is_ok());
        assert!(with_limits(None, None).is_ok());
        for cpu in [-1.0, 0.0, f64::NAN, f64::INFINITY, 1e300, 16.0] {
            assert!(with_limits(Some(cpu), None).is_err(), "cpu {}", cpu);
        }
        assert!(with_limits(None, Some(0)).is_err());
        assert!(with_limits(None, Some(4_000_000)).is_err());
    }

    #[test]
    fn zero_point_question_is_rejected() {
        assert!(coding(0, &[0]).validate(0).is_err());
    }

    #[test]
    fn language_aliases_parse() {
        assert_eq!("C++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert!("cobol".parse::<Language>().is_err());
    }
}
