//! Stage prompt library
//!
//! Holds one template per pipeline prompt and turns task state into rendered
//! prompts. Templates can be replaced from a directory of `<kind>.md` files.

use crate::renderer::{PromptRenderer, PromptTemplate, TemplateVariable};
use crate::{templates, Error, Result};
use content_forge_core::quality::{render_feedback, EvaluationContext, Rubric};
use content_forge_core::task::ContentTask;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// The prompts used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Research,
    Draft,
    Refine,
    Judge,
    Format,
}

impl PromptKind {
    pub const ALL: [PromptKind; 5] = [
        PromptKind::Research,
        PromptKind::Draft,
        PromptKind::Refine,
        PromptKind::Judge,
        PromptKind::Format,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Research => "research",
            PromptKind::Draft => "draft",
            PromptKind::Refine => "refine",
            PromptKind::Judge => "judge",
            PromptKind::Format => "format",
        }
    }

    fn default_template(&self) -> Result<PromptTemplate> {
        use TemplateVariable as V;
        let (body, variables) = match self {
            PromptKind::Research => (
                templates::RESEARCH_TEMPLATE,
                vec![
                    V::required("topic"),
                    V::required("style_guidance"),
                    V::required("target_length"),
                    V::optional("keywords", "none"),
                ],
            ),
            PromptKind::Draft => (
                templates::DRAFT_TEMPLATE,
                vec![
                    V::required("topic"),
                    V::required("style"),
                    V::required("style_guidance"),
                    V::required("target_length"),
                    V::optional("keywords", "none"),
                    V::optional("research_notes", "No research notes available."),
                ],
            ),
            PromptKind::Refine => (
                templates::REFINE_TEMPLATE,
                vec![
                    V::required("topic"),
                    V::required("style"),
                    V::required("style_guidance"),
                    V::required("target_length"),
                    V::required("revision"),
                    V::required("feedback"),
                    V::required("previous_draft"),
                    V::optional("keywords", "none"),
                    V::optional("research_notes", "No research notes available."),
                ],
            ),
            PromptKind::Judge => (
                templates::JUDGE_TEMPLATE,
                vec![
                    V::required("topic"),
                    V::required("style"),
                    V::required("target_length"),
                    V::required("criteria"),
                    V::required("text"),
                    V::optional("keywords", "none"),
                    V::optional("research_notes", "No research notes available."),
                ],
            ),
            PromptKind::Format => (
                templates::FORMAT_TEMPLATE,
                vec![
                    V::required("topic"),
                    V::required("draft"),
                    V::optional("keywords", "none"),
                    V::optional("asset", "none"),
                ],
            ),
        };
        PromptTemplate::new(self.as_str(), body, variables)
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library of stage prompts
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<PromptKind, PromptTemplate>,
    renderer: PromptRenderer,
}

impl PromptLibrary {
    /// Library with the built-in templates
    pub fn with_defaults() -> Result<Self> {
        let mut templates = HashMap::new();
        for kind in PromptKind::ALL {
            templates.insert(kind, kind.default_template()?);
        }
        Ok(Self {
            templates,
            renderer: PromptRenderer::new(),
        })
    }

    /// Replace a template body, keeping its declared variables
    pub fn set_template(&mut self, kind: PromptKind, body: &str) -> Result<()> {
        let template = self.template(kind)?.with_body(body)?;
        self.templates.insert(kind, template);
        Ok(())
    }

    /// Load `<kind>.md` overrides from a directory; returns how many were applied
    pub fn load_overrides(&mut self, dir: &Path) -> Result<usize> {
        let mut applied = 0;
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.md", kind));
            if !path.is_file() {
                continue;
            }
            let body = std::fs::read_to_string(&path).map_err(|source| Error::Io {
                path: path.display().to_string(),
                source,
            })?;
            self.set_template(kind, &body)?;
            debug!(prompt = kind.as_str(), path = %path.display(), "Loaded prompt override");
            applied += 1;
        }
        info!("Applied {} prompt overrides from {}", applied, dir.display());
        Ok(applied)
    }

    pub fn template(&self, kind: PromptKind) -> Result<&PromptTemplate> {
        self.templates
            .get(&kind)
            .ok_or_else(|| Error::PromptNotFound {
                name: kind.as_str().to_string(),
            })
    }

    fn render(&self, kind: PromptKind, variables: HashMap<String, String>) -> Result<String> {
        self.renderer.render(self.template(kind)?, &variables)
    }

    pub fn research(&self, task: &ContentTask) -> Result<String> {
        self.render(PromptKind::Research, task_variables(task))
    }

    pub fn draft(&self, task: &ContentTask) -> Result<String> {
        self.render(PromptKind::Draft, task_variables(task))
    }

    /// Redraft prompt carrying the latest feedback and draft
    pub fn refine(&self, task: &ContentTask) -> Result<String> {
        let previous = task.outputs.draft.as_deref().ok_or_else(|| {
            content_forge_core::Error::precondition("refine", "task has no draft to revise")
        })?;
        let mut variables = task_variables(task);
        variables.insert("revision".into(), task.revision().to_string());
        variables.insert("previous_draft".into(), previous.to_string());
        variables.insert("feedback".into(), render_feedback(&task.outputs.feedback));
        self.render(PromptKind::Refine, variables)
    }

    pub fn judge(&self, text: &str, rubric: &Rubric, context: &EvaluationContext) -> Result<String> {
        let criteria = rubric
            .criteria()
            .iter()
            .map(|c| format!("- {} (weight {:.2})", c.kind, c.weight))
            .collect::<Vec<_>>()
            .join("\n");
        let mut variables = HashMap::new();
        variables.insert("topic".into(), context.topic.clone());
        variables.insert("style".into(), context.style.to_string());
        variables.insert("target_length".into(), context.target_length.to_string());
        variables.insert("criteria".into(), criteria);
        variables.insert("text".into(), text.to_string());
        if !context.keywords.is_empty() {
            variables.insert("keywords".into(), context.keywords.join(", "));
        }
        if let Some(notes) = &context.research_notes {
            variables.insert("research_notes".into(), notes.clone());
        }
        self.render(PromptKind::Judge, variables)
    }

    pub fn format(&self, task: &ContentTask) -> Result<String> {
        let draft = task.outputs.draft.as_deref().ok_or_else(|| {
            content_forge_core::Error::precondition("format", "task has no accepted draft")
        })?;
        let mut variables = task_variables(task);
        variables.insert("draft".into(), draft.to_string());
        if let Some(asset) = &task.outputs.asset {
            let alt = asset.alt_text.as_deref().unwrap_or("article image");
            variables.insert("asset".into(), format!("{} ({})", asset.url, alt));
        }
        self.render(PromptKind::Format, variables)
    }
}

/// Variables every stage prompt can draw from
fn task_variables(task: &ContentTask) -> HashMap<String, String> {
    let input = &task.input;
    let mut variables = HashMap::new();
    variables.insert("topic".to_string(), input.topic.clone());
    variables.insert("style".to_string(), input.style.to_string());
    variables.insert(
        "style_guidance".to_string(),
        input.style.guidance().to_string(),
    );
    variables.insert(
        "target_length".to_string(),
        input.target_length.to_string(),
    );
    if !input.keywords.is_empty() {
        variables.insert("keywords".to_string(), input.keywords.join(", "));
    }
    if let Some(notes) = &task.outputs.research_notes {
        variables.insert("research_notes".to_string(), notes.clone());
    }
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_forge_core::quality::{CriterionKind, Feedback};
    use content_forge_core::task::{ContentStyle, TaskInput};

    fn task() -> ContentTask {
        let input = TaskInput::builder()
            .topic("renewable energy incentives")
            .target_length(900)
            .style(ContentStyle::Technical)
            .keyword("solar")
            .keyword("tax credit")
            .build()
            .unwrap();
        ContentTask::new(input)
    }

    #[test]
    fn test_defaults_render_for_every_stage() {
        let library = PromptLibrary::with_defaults().unwrap();
        let mut task = task();

        let research = library.research(&task).unwrap();
        assert!(research.contains("renewable energy incentives"));
        assert!(research.contains("solar, tax credit"));

        task.outputs.research_notes = Some("Federal credit covers 30%.".into());
        let draft = library.draft(&task).unwrap();
        assert!(draft.contains("Federal credit covers 30%."));
        assert!(draft.contains("900 words"));

        assert!(library.refine(&task).is_err());
        assert!(library.format(&task).is_err());

        task.outputs.draft = Some("# Incentives\nBody".into());
        task.outputs.feedback = vec![Feedback::new(CriterionKind::Structure, "Add a conclusion.")];
        task.refinement_count = 1;
        let refine = library.refine(&task).unwrap();
        assert!(refine.contains("revision 2"));
        assert!(refine.contains("- [structure] Add a conclusion."));
        assert!(refine.contains("# Incentives"));

        let format = library.format(&task).unwrap();
        assert!(format.contains("## Selected asset\nnone"));
    }

    #[test]
    fn test_judge_lists_rubric_in_order() {
        let library = PromptLibrary::with_defaults().unwrap();
        let context = EvaluationContext {
            topic: "heat pumps".into(),
            target_length: 500,
            style: ContentStyle::Informative,
            keywords: Vec::new(),
            research_notes: None,
            threshold: 0.8,
            preferred_backend: None,
        };
        let prompt = library.judge("draft text", &Rubric::default(), &context).unwrap();
        let clarity = prompt.find("- clarity").unwrap();
        let originality = prompt.find("- originality").unwrap();
        assert!(clarity < originality);
        assert!(prompt.contains("Keywords: none"));
        assert!(prompt.contains(r#""clarity": {"score": 0.8, "note": "..."}"#));
    }

    #[test]
    fn test_every_default_template_loads() {
        let library = PromptLibrary::with_defaults().unwrap();
        for kind in PromptKind::ALL {
            assert!(library.template(kind).is_ok(), "{}", kind);
        }
    }

    #[test]
    fn test_overrides_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("research.md"), "Notes on {{topic}} please.").unwrap();
        std::fs::write(dir.path().join("draft.md"), "Draft {{unknown}}").unwrap();

        let mut library = PromptLibrary::with_defaults().unwrap();
        let err = library.load_overrides(dir.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate(_)));

        std::fs::remove_file(dir.path().join("draft.md")).unwrap();
        let mut library = PromptLibrary::with_defaults().unwrap();
        assert_eq!(library.load_overrides(dir.path()).unwrap(), 1);
        assert_eq!(
            library.research(&task()).unwrap(),
            "Notes on renewable energy incentives please."
        );
    }
}
