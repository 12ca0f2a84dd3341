//! Prompt template rendering
//!
//! Templates use `{{variable}}` placeholders. Every placeholder must be
//! declared on the template, either required or with a default value.

use crate::{Error, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::debug;

/// Matches `{{name}}`, tolerating inner whitespace
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-z_][a-z0-9_]*)\s*\}\}").expect("Invalid placeholder regex")
});

/// A variable accepted by a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVariable {
    pub name: String,
    pub required: bool,
    pub default_value: Option<String>,
}

impl TemplateVariable {
    pub fn required<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            required: true,
            default_value: None,
        }
    }

    pub fn optional<S: Into<String>, D: Into<String>>(name: S, default_value: D) -> Self {
        Self {
            name: name.into(),
            required: false,
            default_value: Some(default_value.into()),
        }
    }
}

/// A named template with its declared variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    template: String,
    variables: Vec<TemplateVariable>,
}

impl PromptTemplate {
    /// Create a template, checking that every placeholder is declared
    pub fn new<S: Into<String>, T: Into<String>>(
        name: S,
        template: T,
        variables: Vec<TemplateVariable>,
    ) -> Result<Self> {
        let template = Self {
            name: name.into(),
            template: template.into(),
            variables,
        };
        template.validate()?;
        Ok(template)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn variables(&self) -> &[TemplateVariable] {
        &self.variables
    }

    /// Same declared variables, different body
    pub fn with_body<T: Into<String>>(&self, template: T) -> Result<Self> {
        Self::new(self.name.clone(), template, self.variables.clone())
    }

    /// Placeholder names used by the body
    pub fn placeholders(&self) -> BTreeSet<String> {
        PLACEHOLDER
            .captures_iter(&self.template)
            .map(|c| c[1].to_string())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let stripped = PLACEHOLDER.replace_all(&self.template, "");
        if stripped.contains("{{") || stripped.contains("}}") {
            return Err(Error::InvalidTemplate(format!(
                "template '{}' has an unbalanced or malformed placeholder",
                self.name
            )));
        }
        for placeholder in self.placeholders() {
            if !self.variables.iter().any(|v| v.name == placeholder) {
                return Err(Error::InvalidTemplate(format!(
                    "template '{}' uses undeclared variable '{}'",
                    self.name, placeholder
                )));
            }
        }
        Ok(())
    }
}

/// Renders prompt templates with variable substitution
#[derive(Debug, Clone, Default)]
pub struct PromptRenderer;

impl PromptRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a template with the provided variables
    pub fn render(
        &self,
        template: &PromptTemplate,
        variables: &HashMap<String, String>,
    ) -> Result<String> {
        self.validate_variables(template, variables)?;

        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&template.template, |caps: &regex::Captures| {
            let name = &caps[1];
            let value = variables.get(name).or_else(|| {
                template
                    .variables
                    .iter()
                    .find(|v| v.name == name)
                    .and_then(|v| v.default_value.as_ref())
            });
            match value {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        if let Some(name) = missing {
            return Err(Error::MissingVariable { name });
        }

        debug!(
            template = template.name(),
            chars = rendered.len(),
            "Rendered prompt"
        );
        Ok(rendered.into_owned())
    }

    fn validate_variables(
        &self,
        template: &PromptTemplate,
        variables: &HashMap<String, String>,
    ) -> Result<()> {
        for variable in &template.variables {
            if variable.required
                && !variables.contains_key(&variable.name)
                && variable.default_value.is_none()
            {
                return Err(Error::MissingVariable {
                    name: variable.name.clone(),
                });
            }
        }
        Ok(())
    }
}
