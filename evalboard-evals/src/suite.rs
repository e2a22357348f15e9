//! Test suite types: test cases, task types, and prompt templates.
//!
//! The suite is owned by an external store; the engine only reads snapshots
//! of it when a run starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ProjectId, PromptVersionId, TestCaseId};

/// The placeholder a prompt template must contain exactly once.
pub const PROMPT_PLACEHOLDER: &str = "{{prompt}}";

/// Template offered when a project creates its first prompt version.
pub const DEFAULT_TEMPLATE: &str = "You are a helpful assistant.\n\nUser Question: {{prompt}}";

/// Kind of task a test case exercises. Selects the scoring policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    General,
    Math,
    Code,
    /// Red-team prompts; passing means the output avoids disallowed content.
    Safety,
    /// Retrieval-augmented prompts answered from an attached context document.
    Rag,
}

impl TaskType {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Math => "math",
            Self::Code => "code",
            Self::Safety => "safety",
            Self::Rag => "rag",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Self::General),
            "math" => Some(Self::Math),
            "code" => Some(Self::Code),
            "safety" | "red_team" | "redteam" => Some(Self::Safety),
            "rag" => Some(Self::Rag),
            _ => None,
        }
    }
}

/// A single test case in a project's suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub project_id: ProjectId,
    pub prompt: String,
    /// Reference answer; absent for open-ended safety and RAG cases.
    pub expected: Option<String>,
    pub task_type: TaskType,
    /// Grounding document for RAG cases.
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestCase {
    /// The expected answer, treating blank strings as absent.
    pub fn expected_answer(&self) -> Option<&str> {
        self.expected.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Fields needed to add a test case to a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTestCase {
    pub prompt: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub context: Option<String>,
}

/// An append-only version of a project's prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: PromptVersionId,
    pub project_id: ProjectId,
    /// Ordinal version number, starting at 1 per project.
    pub version: u32,
    pub template: String,
    pub created_at: DateTime<Utc>,
}

impl PromptVersion {
    /// Parse this version's template.
    pub fn parsed(&self) -> Result<Template> {
        Template::parse(&self.template)
    }
}

/// A validated prompt template, split around its single placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    prefix: String,
    suffix: String,
}

impl Template {
    /// Validate a template string.
    ///
    /// The template must contain [`PROMPT_PLACEHOLDER`] exactly once and no
    /// other `{{`/`}}` markers.
    pub fn parse(template: &str) -> Result<Self> {
        let occurrences = template.matches(PROMPT_PLACEHOLDER).count();
        if occurrences == 0 {
            return Err(Error::MalformedTemplate(format!(
                "missing {PROMPT_PLACEHOLDER} placeholder"
            )));
        }
        if occurrences > 1 {
            return Err(Error::MalformedTemplate(format!(
                "{PROMPT_PLACEHOLDER} appears {occurrences} times, expected once"
            )));
        }

        let (prefix, suffix) = template
            .split_once(PROMPT_PLACEHOLDER)
            .unwrap_or((template, ""));
        for part in [prefix, suffix] {
            if part.contains("{{") || part.contains("}}") {
                return Err(Error::MalformedTemplate(
                    "unrecognized placeholder; only {{prompt}} is supported".to_string(),
                ));
            }
        }

        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Substitute a test prompt into the placeholder.
    pub fn render(&self, prompt: &str) -> String {
        let mut out = String::with_capacity(self.prefix.len() + prompt.len() + self.suffix.len());
        out.push_str(&self.prefix);
        out.push_str(prompt);
        out.push_str(&self.suffix);
        out
    }
}

/// Build the exact prompt sent to the model for a test case.
///
/// Without a template the raw prompt is used unchanged. RAG context is
/// appended after rendering, never interpolated into the template.
pub fn render_prompt(template: Option<&Template>, case: &TestCase) -> String {
    let mut rendered = match template {
        Some(t) => t.render(&case.prompt),
        None => case.prompt.clone(),
    };
    if case.task_type == TaskType::Rag
        && let Some(context) = case.context.as_deref().filter(|c| !c.trim().is_empty())
    {
        rendered.push_str("\n\nContext:\n");
        rendered.push_str(context);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(task_type: TaskType, context: Option<&str>) -> TestCase {
        TestCase {
            id: TestCaseId(1),
            project_id: ProjectId(1),
            prompt: "What is the capital of France?".to_string(),
            expected: Some("Paris".to_string()),
            task_type,
            context: context.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    // ==================== TaskType Tests ====================

    #[test]
    fn task_type_as_str_and_parse_agree() {
        for t in [
            TaskType::General,
            TaskType::Math,
            TaskType::Code,
            TaskType::Safety,
            TaskType::Rag,
        ] {
            assert_eq!(TaskType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn task_type_parse_accepts_red_team_alias_and_case() {
        assert_eq!(TaskType::parse("Red_Team"), Some(TaskType::Safety));
        assert_eq!(TaskType::parse(" RAG "), Some(TaskType::Rag));
        assert_eq!(TaskType::parse("poetry"), None);
    }

    // ==================== Template Tests ====================

    #[test]
    fn template_renders_prompt_into_placeholder() {
        let template = Template::parse(DEFAULT_TEMPLATE).unwrap();
        assert_eq!(
            template.render("2 + 2?"),
            "You are a helpful assistant.\n\nUser Question: 2 + 2?"
        );
    }

    #[test]
    fn template_without_placeholder_is_malformed() {
        let err = Template::parse("Answer carefully.").unwrap_err();
        assert!(matches!(err, Error::MalformedTemplate(_)));
    }

    #[test]
    fn template_with_two_placeholders_is_malformed() {
        let err = Template::parse("{{prompt}} and again {{prompt}}").unwrap_err();
        assert!(err.to_string().contains("appears 2 times"));
    }

    #[test]
    fn template_with_unknown_placeholder_is_malformed() {
        assert!(Template::parse("{{system}} {{prompt}}").is_err());
        assert!(Template::parse("{{ prompt }} {{prompt}}").is_err());
    }

    #[test]
    fn template_does_not_reinterpret_braces_in_prompt() {
        let template = Template::parse("Q: {{prompt}}").unwrap();
        assert_eq!(template.render("{{prompt}}"), "Q: {{prompt}}");
    }

    // ==================== render_prompt Tests ====================

    #[test]
    fn render_prompt_uses_raw_prompt_without_template() {
        let c = case(TaskType::General, None);
        assert_eq!(render_prompt(None, &c), c.prompt);
    }

    #[test]
    fn render_prompt_appends_rag_context_after_template() {
        let template = Template::parse("Q: {{prompt}}").unwrap();
        let c = case(TaskType::Rag, Some("France's capital is Paris."));
        assert_eq!(
            render_prompt(Some(&template), &c),
            "Q: What is the capital of France?\n\nContext:\nFrance's capital is Paris."
        );
    }

    #[test]
    fn render_prompt_ignores_context_for_other_task_types() {
        let c = case(TaskType::General, Some("ignored"));
        assert_eq!(render_prompt(None, &c), c.prompt);
    }

    #[test]
    fn expected_answer_treats_blank_as_absent() {
        let mut c = case(TaskType::General, None);
        c.expected = Some("   ".to_string());
        assert!(c.expected_answer().is_none());
    }
}
