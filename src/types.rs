//! Pipeline definition types.
//!
//! A [`Pipeline`] is usually produced by an external parser and handed to
//! this crate as JSON (or YAML with the `yaml` feature). It can also be
//! assembled in code with [`PipelineBuilder`].

use crate::{error::Result, template::Template, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How a template produces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionType {
    /// Plain parameter substitution.
    Simple,
    /// A call to a language model.
    Model,
    /// A script run by the script execution tools.
    Script,
    /// A question answered by a human through the user interface tools.
    Dialog,
}

/// Which kind of model endpoint a prompt needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelVariant {
    Chat,
    Completion,
    Embedding,
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelVariant::Chat => "CHAT",
            ModelVariant::Completion => "COMPLETION",
            ModelVariant::Embedding => "EMBEDDING",
        })
    }
}

/// Model selection and sampling settings for a MODEL template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequirements {
    pub model_variant: ModelVariant,

    /// Specific model; `None` lets the provider pick its default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelRequirements {
    pub fn new(model_variant: ModelVariant) -> Self {
        Self {
            model_variant,
            model_name: None,
            system_message: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn chat() -> Self {
        Self::new(ModelVariant::Chat)
    }

    pub fn completion() -> Self {
        Self::new(ModelVariant::Completion)
    }

    pub fn embedding() -> Self {
        Self::new(ModelVariant::Embedding)
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

impl Default for ModelRequirements {
    fn default() -> Self {
        Self::chat()
    }
}

/// A pipeline-level parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_input: bool,
    #[serde(default)]
    pub is_output: bool,
}

impl ParameterDeclaration {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_input: true,
            is_output: false,
        }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_input: false,
            is_output: true,
        }
    }

    pub fn intermediate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_input: false,
            is_output: false,
        }
    }
}

/// A named graph of templates plus parameter declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    #[serde(default, alias = "promptbookUrl", skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterDeclaration>,

    #[serde(default, alias = "promptTemplates")]
    pub templates: Vec<Template>,
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder(title: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(title)
    }

    /// Parse a pipeline definition from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a pipeline definition from YAML.
    #[cfg(feature = "yaml")]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::InvalidConfig(format!("Invalid pipeline YAML: {}", e)))
    }

    /// Names of the declared input parameters.
    pub fn input_names(&self) -> BTreeSet<String> {
        self.parameters
            .iter()
            .filter(|p| p.is_input)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Names of the declared output parameters.
    pub fn output_names(&self) -> BTreeSet<String> {
        self.parameters
            .iter()
            .filter(|p| p.is_output)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Static checks run before any execution.
    ///
    /// The executor relies on these: a pipeline that passes can always be
    /// scheduled to completion.
    pub fn validate(&self) -> Result<()> {
        let inputs = self.input_names();
        let mut names = BTreeSet::new();
        let mut produced: BTreeMap<&str, &str> = BTreeMap::new();

        for template in &self.templates {
            if !names.insert(template.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Template name '{}' is used more than once",
                    template.name
                )));
            }

            let resulting = template.resulting_parameter_name.as_str();
            if let Some(other) = produced.insert(resulting, &template.name) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Parameter {{{}}} is produced by both '{}' and '{}'",
                    resulting, other, template.name
                )));
            }
            if inputs.contains(resulting) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Template '{}' overwrites input parameter {{{}}}",
                    template.name, resulting
                )));
            }

            for joker in &template.jokers {
                if !template.dependent_parameter_names.contains(joker) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "Joker parameter {{{}}} of template '{}' is not one of its dependencies",
                        joker, template.name
                    )));
                }
            }

            if template.execution_type != ExecutionType::Script {
                for placeholder in crate::template::placeholders(&template.content) {
                    if !template.dependent_parameter_names.contains(&placeholder) {
                        return Err(PipelineError::InvalidConfig(format!(
                            "Template '{}' uses parameter {{{}}} without depending on it",
                            template.name, placeholder
                        )));
                    }
                }
            }

            if template.execution_type == ExecutionType::Model
                && template.model_requirements.is_none()
            {
                return Err(PipelineError::InvalidConfig(format!(
                    "Template '{}' is a MODEL template without model requirements",
                    template.name
                )));
            }
        }

        for template in &self.templates {
            for dependency in &template.dependent_parameter_names {
                if !inputs.contains(dependency) && !produced.contains_key(dependency.as_str()) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "Template '{}' depends on {{{}}}, which is neither an input nor produced by any template",
                        template.name, dependency
                    )));
                }
            }
        }

        // Simulated resolution catches dependency cycles.
        let mut resolved = inputs;
        let mut unresolved: Vec<&Template> = self.templates.iter().collect();
        while let Some(pos) = unresolved.iter().position(|t| t.is_ready(&resolved)) {
            let template = unresolved.swap_remove(pos);
            resolved.insert(template.resulting_parameter_name.clone());
        }
        if !unresolved.is_empty() {
            let stuck: Vec<&str> = unresolved.iter().map(|t| t.name.as_str()).collect();
            return Err(PipelineError::InvalidConfig(format!(
                "Dependency cycle between templates: {}",
                stuck.join(", ")
            )));
        }

        Ok(())
    }
}

/// Builder for creating pipelines.
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline {
                pipeline_url: None,
                title: title.into(),
                description: None,
                parameters: Vec::new(),
                templates: Vec::new(),
            },
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.pipeline.pipeline_url = Some(url.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.pipeline.description = Some(description.into());
        self
    }

    /// Declare an input parameter.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.pipeline.parameters.push(ParameterDeclaration::input(name));
        self
    }

    /// Declare an output parameter.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.pipeline.parameters.push(ParameterDeclaration::output(name));
        self
    }

    /// Add any parameter declaration.
    pub fn parameter(mut self, declaration: ParameterDeclaration) -> Self {
        self.pipeline.parameters.push(declaration);
        self
    }

    /// Add a template to the pipeline.
    pub fn add_template(mut self, template: Template) -> Self {
        self.pipeline.templates.push(template);
        self
    }

    /// Build the pipeline, validating configuration.
    pub fn build(self) -> Result<Pipeline> {
        if self.pipeline.templates.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Pipeline must have at least one template".to_string(),
            ));
        }
        self.pipeline.validate()?;
        Ok(self.pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_template(name: &str, content: &str) -> Template {
        Template::new(name, content).with_model(ModelRequirements::chat())
    }

    #[test]
    fn test_builder_success() {
        let pipeline = Pipeline::builder("Bio")
            .input("name")
            .output("bio")
            .add_template(chat_template("bio", "Write a bio of {name}"))
            .build();
        assert!(pipeline.is_ok());
    }

    #[test]
    fn test_empty_pipeline_fails() {
        let result = Pipeline::builder("Empty").build();
        match result.unwrap_err() {
            PipelineError::InvalidConfig(msg) => assert!(msg.contains("at least one template")),
            other => panic!("Expected InvalidConfig error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_resulting_parameter_fails() {
        let result = Pipeline::builder("Dup")
            .input("x")
            .add_template(Template::new("a", "{x}").producing("y"))
            .add_template(Template::new("b", "{x}!").producing("y"))
            .build();
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("produced by both"));
    }

    #[test]
    fn test_unknown_dependency_fails() {
        let result = Pipeline::builder("Missing")
            .add_template(Template::new("a", "{ghost}"))
            .build();
        assert!(result.unwrap_err().to_string().contains("{ghost}"));
    }

    #[test]
    fn test_cycle_fails() {
        let result = Pipeline::builder("Cycle")
            .add_template(Template::new("a", "{b}"))
            .add_template(Template::new("b", "{a}"))
            .build();
        assert!(result.unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn test_joker_must_be_dependency() {
        let mut template = Template::new("a", "{x}");
        template.jokers.push("y".into());
        let result = Pipeline::builder("Joker")
            .input("x")
            .input("y")
            .add_template(template)
            .build();
        assert!(result.unwrap_err().to_string().contains("Joker"));
    }

    #[test]
    fn test_overwriting_input_fails() {
        let result = Pipeline::builder("Overwrite")
            .input("x")
            .add_template(Template::new("a", "static").producing("x"))
            .build();
        assert!(result.unwrap_err().to_string().contains("overwrites input"));
    }

    #[test]
    fn test_from_json_accepts_parser_field_names() {
        let json = r#"{
            "promptbookUrl": "https://example.com/bio.ptbk.md",
            "title": "Bio",
            "parameters": [
                {"name": "name", "isInput": true},
                {"name": "bio", "isOutput": true}
            ],
            "promptTemplates": [{
                "name": "bio",
                "title": "Bio",
                "executionType": "MODEL",
                "dependentParameterNames": ["name"],
                "resultingParameterName": "bio",
                "content": "Write a bio of {name}",
                "modelRequirements": {"modelVariant": "CHAT"},
                "expectations": {"characters": {"min": 1}},
                "jokers": []
            }]
        }"#;
        let pipeline = Pipeline::from_json(json).unwrap();
        assert_eq!(
            pipeline.pipeline_url.as_deref(),
            Some("https://example.com/bio.ptbk.md")
        );
        assert_eq!(pipeline.templates.len(), 1);
        assert_eq!(pipeline.templates[0].execution_type, ExecutionType::Model);
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_unknown_model_variant_is_rejected() {
        let json = r#"{"modelVariant": "IMAGE"}"#;
        assert!(serde_json::from_str::<ModelRequirements>(json).is_err());
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_from_yaml() {
        let yaml = r#"
title: Echo
parameters:
  - name: text
    isInput: true
  - name: echo
    isOutput: true
templates:
  - name: echo
    title: Echo
    executionType: SIMPLE
    dependentParameterNames: [text]
    resultingParameterName: echo
    content: "{text}"
"#;
        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        assert!(pipeline.validate().is_ok());
    }
}
