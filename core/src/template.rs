//! Task templates (§4.7): a small built-in registry plus instantiation by
//! textual `{variable}` substitution.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::task::{Evidence, Severity, SuggestedFix, TaskCard, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub title_pattern: String,
    pub description_pattern: String,
    pub default_severity: Severity,
    pub default_priority: i32,
    pub default_suggested_fix: SuggestedFix,
    pub default_acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Built-in templates may not be created, updated, or deleted.
    pub built_in: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template is built-in and cannot be modified: {0}")]
    BuiltIn(String),
    #[error("unreplaced template variable: {0}")]
    UnreplacedVariable(String),
    #[error(transparent)]
    NotFound(#[from] crate::error::NotFoundError),
}

fn builtin(
    id: &str,
    title_pattern: &str,
    description_pattern: &str,
    severity: Severity,
    priority: i32,
    approach: &str,
    acceptance: &[&str],
) -> Template {
    Template {
        id: id.into(),
        title_pattern: title_pattern.into(),
        description_pattern: description_pattern.into(),
        default_severity: severity,
        default_priority: priority,
        default_suggested_fix: SuggestedFix {
            approach: approach.into(),
            files: Vec::new(),
            changes: Vec::new(),
            estimated_effort: None,
        },
        default_acceptance_criteria: acceptance.iter().map(|s| s.to_string()).collect(),
        tags: Vec::new(),
        built_in: true,
    }
}

/// The fixed, immutable set of built-in templates (≥ 5 per §4.7).
pub fn built_in_templates() -> Vec<Template> {
    vec![
        builtin(
            "investigate-tool-failure",
            "Investigate repeated failures in {tool_name}",
            "The tool {tool_name} has failed {failure_count} times in the last {window}. Root-cause and remediate.",
            Severity::High,
            70,
            "root_cause_analysis",
            &["Failure mode identified", "Fix deployed or documented"],
        ),
        builtin(
            "document-tool",
            "Document the {tool_name} tool",
            "{tool_name} is called {call_count} times but has no documentation on record.",
            Severity::Medium,
            50,
            "add_documentation",
            &["Tool documentation published"],
        ),
        builtin(
            "reduce-latency",
            "Reduce latency of {operation}",
            "{operation} p95 latency is {p95_ms}ms, {ratio}x the baseline.",
            Severity::High,
            65,
            "performance_tuning",
            &["p95 latency within 1.2x of baseline"],
        ),
        builtin(
            "improve-conversation-completion",
            "Improve completion rate for {conversation_kind} conversations",
            "{abort_rate}% of {conversation_kind} conversations end without a successful completion.",
            Severity::High,
            70,
            "ux_review",
            &["Abort rate reduced below threshold"],
        ),
        builtin(
            "raise-max-tokens",
            "Raise max-token budget for {endpoint}",
            "{continuation_rate}% of responses from {endpoint} are truncated and continued.",
            Severity::Medium,
            55,
            "configuration_change",
            &["Continuation rate below threshold"],
        ),
    ]
}

/// Substitutes `{name}` tokens in `pattern` using `variables`. Returns an
/// error naming the first unreplaced token, per §9's "hard error, not a
/// silent leave-in-place" rule.
fn substitute(pattern: &str, variables: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(pattern.len());
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = pattern[i..].find('}') {
                let name = &pattern[i + 1..i + end];
                match variables.get(name) {
                    Some(value) => {
                        out.push_str(value);
                        i += end + 1;
                        continue;
                    }
                    None => return Err(TemplateError::UnreplacedVariable(name.to_string())),
                }
            }
        }
        let ch = pattern[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

/// Builds a task from a template with `analyzer = "template"` and
/// `confidence = 1.0`, per §4.7.
pub fn instantiate(
    template: &Template,
    variables: &HashMap<String, String>,
    id: String,
) -> Result<TaskCard, TemplateError> {
    let title = substitute(&template.title_pattern, variables)?;
    let description = substitute(&template.description_pattern, variables)?;
    let confidence = 1.0;
    let evidence = Evidence {
        summary: title.clone(),
        ..Default::default()
    };
    let priority = crate::task::compute_priority(template.default_severity, confidence, &evidence);

    Ok(TaskCard {
        id,
        task_type: TaskType::Template,
        severity: template.default_severity,
        status: crate::task::Status::Generated,
        title,
        description,
        evidence,
        suggested_fix: template.default_suggested_fix.clone(),
        acceptance_criteria: template.default_acceptance_criteria.clone(),
        priority: priority.max(template.default_priority),
        confidence,
        analyzer: "template".into(),
        generated_at: Utc::now(),
        approved_at: None,
        dismissed_at: None,
        completed_at: None,
        dismiss_reason: None,
        metadata: None,
    })
}

/// A user-extensible registry: built-ins plus added/updated records.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    pub fn with_builtins() -> Self {
        let mut templates = HashMap::new();
        for t in built_in_templates() {
            templates.insert(t.id.clone(), t);
        }
        Self { templates }
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&Template> {
        let mut all: Vec<&Template> = self.templates.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn create(&mut self, template: Template) -> Result<(), TemplateError> {
        if template.built_in {
            return Err(TemplateError::BuiltIn(template.id));
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn update(&mut self, id: &str, mut template: Template) -> Result<(), TemplateError> {
        match self.templates.get(id) {
            Some(existing) if existing.built_in => {
                return Err(TemplateError::BuiltIn(id.to_string()))
            }
            None => return Err(crate::error::NotFoundError(id.to_string()).into()),
            Some(_) => {}
        }
        template.built_in = false;
        self.templates.insert(id.to_string(), template);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), TemplateError> {
        match self.templates.get(id) {
            Some(existing) if existing.built_in => {
                return Err(TemplateError::BuiltIn(id.to_string()))
            }
            None => return Err(crate::error::NotFoundError(id.to_string()).into()),
            Some(_) => {}
        }
        self.templates.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_five_builtins() {
        assert!(built_in_templates().len() >= 5);
    }

    #[test]
    fn instantiate_substitutes_variables() {
        let registry = TemplateRegistry::with_builtins();
        let template = registry.get("document-tool").unwrap();
        let mut vars = HashMap::new();
        vars.insert("tool_name".to_string(), "read_file".to_string());
        vars.insert("call_count".to_string(), "42".to_string());
        let task = instantiate(template, &vars, "tpl-1".into()).unwrap();
        assert_eq!(task.title, "Document the read_file tool");
        assert_eq!(task.analyzer, "template");
        assert_eq!(task.confidence, 1.0);
    }

    #[test]
    fn instantiate_missing_variable_is_error() {
        let registry = TemplateRegistry::with_builtins();
        let template = registry.get("document-tool").unwrap();
        let vars = HashMap::new();
        let err = instantiate(template, &vars, "tpl-1".into());
        assert!(matches!(err, Err(TemplateError::UnreplacedVariable(_))));
    }

    #[test]
    fn builtin_templates_cannot_be_deleted() {
        let mut registry = TemplateRegistry::with_builtins();
        let err = registry.delete("document-tool");
        assert!(matches!(err, Err(TemplateError::BuiltIn(_))));
    }
}
