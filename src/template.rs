//! Pipeline templates and `{parameter}` rendering.

use crate::{
    error::Result,
    expectations::{ExpectFormat, Expectations},
    types::{ExecutionType, ModelRequirements},
    PipelineError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single step of a pipeline. Produces exactly one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Unique name within the pipeline (for logging and reports).
    pub name: String,

    /// Human-readable title; also the title of prompts sent to models.
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub execution_type: ExecutionType,

    /// Parameters that must be resolved before this template may start.
    #[serde(default)]
    pub dependent_parameter_names: BTreeSet<String>,

    /// The parameter this template produces. Unique across the pipeline.
    pub resulting_parameter_name: String,

    /// Text with `{param}` placeholders; the script source for SCRIPT templates.
    pub content: String,

    /// Script language of `content` for SCRIPT templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_requirements: Option<ModelRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectations: Option<Expectations>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_format: Option<ExpectFormat>,

    /// Script function names applied in order to every real result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocessing: Vec<String>,

    /// Fallback parameters tried, in order, before any real attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jokers: Vec<String>,
}

impl Template {
    /// Create a SIMPLE template producing a parameter named like the template.
    ///
    /// Dependencies are inferred from the `{param}` placeholders in `content`.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let content = content.into();
        Self {
            title: name.clone(),
            description: None,
            execution_type: ExecutionType::Simple,
            dependent_parameter_names: placeholders(&content),
            resulting_parameter_name: name.clone(),
            name,
            content,
            content_language: None,
            model_requirements: None,
            expectations: None,
            expect_format: None,
            postprocessing: Vec::new(),
            jokers: Vec::new(),
        }
    }

    /// Set the produced parameter name.
    pub fn producing(mut self, parameter: impl Into<String>) -> Self {
        self.resulting_parameter_name = parameter.into();
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add a dependency not mentioned in the content.
    pub fn depends_on(mut self, parameter: impl Into<String>) -> Self {
        self.dependent_parameter_names.insert(parameter.into());
        self
    }

    /// Turn this into a MODEL template.
    pub fn with_model(mut self, requirements: ModelRequirements) -> Self {
        self.execution_type = ExecutionType::Model;
        self.model_requirements = Some(requirements);
        self
    }

    /// Turn this into a SCRIPT template in `language`.
    ///
    /// Script sources are not scanned for placeholders; declare inputs with
    /// [`depends_on`](Self::depends_on).
    pub fn with_script(mut self, language: impl Into<String>) -> Self {
        self.execution_type = ExecutionType::Script;
        self.content_language = Some(language.into());
        self.dependent_parameter_names.clear();
        self
    }

    /// Turn this into a DIALOG template answered by the user interface tools.
    pub fn with_dialog(mut self) -> Self {
        self.execution_type = ExecutionType::Dialog;
        self
    }

    pub fn with_expectations(mut self, expectations: Expectations) -> Self {
        self.expectations = Some(expectations);
        self
    }

    pub fn with_expect_format(mut self, format: ExpectFormat) -> Self {
        self.expect_format = Some(format);
        self
    }

    /// Append a postprocessing function.
    pub fn with_postprocessing(mut self, function_name: impl Into<String>) -> Self {
        self.postprocessing.push(function_name.into());
        self
    }

    /// Append a joker. Jokers are dependencies too.
    pub fn with_joker(mut self, parameter: impl Into<String>) -> Self {
        let parameter = parameter.into();
        self.dependent_parameter_names.insert(parameter.clone());
        self.jokers.push(parameter);
        self
    }

    /// Whether every dependency is already resolved.
    pub fn is_ready(&self, resolved: &BTreeSet<String>) -> bool {
        self.dependent_parameter_names.is_subset(resolved)
    }

    /// Render `content` against the given parameters.
    pub fn render(&self, parameters: &BTreeMap<String, String>) -> Result<String> {
        render_template(&self.content, parameters)
    }
}

/// Builder for creating templates with validation.
pub struct TemplateBuilder {
    template: Template,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            template: Template::new(name, ""),
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.template.dependent_parameter_names.extend(placeholders(&content));
        self.template.content = content;
        self
    }

    pub fn producing(mut self, parameter: impl Into<String>) -> Self {
        self.template = self.template.producing(parameter);
        self
    }

    pub fn model(mut self, requirements: ModelRequirements) -> Self {
        self.template = self.template.with_model(requirements);
        self
    }

    pub fn expectations(mut self, expectations: Expectations) -> Self {
        self.template.expectations = Some(expectations);
        self
    }

    pub fn joker(mut self, parameter: impl Into<String>) -> Self {
        self.template = self.template.with_joker(parameter);
        self
    }

    pub fn postprocessing(mut self, function_name: impl Into<String>) -> Self {
        self.template = self.template.with_postprocessing(function_name);
        self
    }

    pub fn build(self) -> Result<Template> {
        if self.template.content.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "Template '{}' content cannot be empty",
                self.template.name
            )));
        }
        if self.template.execution_type == ExecutionType::Model
            && self.template.model_requirements.is_none()
        {
            return Err(PipelineError::InvalidConfig(format!(
                "Template '{}' is a MODEL template without model requirements",
                self.template.name
            )));
        }
        Ok(self.template)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// If `tail` starts with `{identifier}`, return the identifier.
fn placeholder_at(tail: &str) -> Option<&str> {
    let end = tail.find('}')?;
    let name = &tail[1..end];
    is_identifier(name).then_some(name)
}

/// Names of all `{param}` placeholders in `content`.
///
/// `{{` and `}}` are escapes and never start a placeholder. Braces around
/// anything that is not an identifier (e.g. JSON) are left alone.
pub fn placeholders(content: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut rest = content;
    while let Some(pos) = rest.find(['{', '}']) {
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            rest = &tail[2..];
            continue;
        }
        if let Some(name) = tail.starts_with('{').then(|| placeholder_at(tail)).flatten() {
            names.insert(name.to_string());
            rest = &tail[name.len() + 2..];
            continue;
        }
        rest = &tail[1..];
    }
    names
}

/// Substitute `{param}` placeholders.
///
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
/// Substituted values are never re-scanned. A placeholder without a value
/// is an internal error: dependencies are validated before execution.
///
/// # Example
///
/// ```
/// use prompt_pipeline::template::render_template;
/// use std::collections::BTreeMap;
///
/// let params = BTreeMap::from([("name".to_string(), "Alice".to_string())]);
/// let result = render_template("Hello {name}, JSON: {{\"key\": 1}}", &params).unwrap();
/// assert_eq!(result, r#"Hello Alice, JSON: {"key": 1}"#);
/// ```
pub fn render_template(content: &str, parameters: &BTreeMap<String, String>) -> Result<String> {
    let mut rendered = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(pos) = rest.find(['{', '}']) {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            rendered.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            rendered.push('}');
            rest = &tail[2..];
            continue;
        }
        if let Some(name) = tail.starts_with('{').then(|| placeholder_at(tail)).flatten() {
            let value = parameters.get(name).ok_or_else(|| {
                PipelineError::Unexpected(format!("Parameter {{{}}} is not defined", name))
            })?;
            rendered.push_str(value);
            rest = &tail[name.len() + 2..];
            continue;
        }
        rendered.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}
