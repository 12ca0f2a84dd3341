//! Default stage prompt templates

/// Research stage: gather facts and angles before drafting
pub const RESEARCH_TEMPLATE: &str = r#"You are a research assistant preparing background notes for an article.

## Topic
{{topic}}

## Audience and style
The article will be {{style_guidance}}, roughly {{target_length}} words long.

## Keywords to cover
{{keywords}}

## Instructions
- List the key facts, figures and definitions a writer needs, one per line.
- Note the strongest two or three angles for the article.
- Flag any claim that is contested or time-sensitive.
- Do not write the article itself.
"#;

/// Draft stage: first full draft from the research notes
pub const DRAFT_TEMPLATE: &str = r#"You are a professional writer producing a {{style}} article.

## Topic
{{topic}}

## Requirements
- Length: about {{target_length}} words.
- Style: {{style_guidance}}.
- Work these keywords in naturally: {{keywords}}.
- Use markdown headings for sections, with an introduction and a conclusion.
- Only state facts supported by the research notes.

## Research notes
{{research_notes}}

Write the complete article in markdown.
"#;

/// Refine stage: redraft with the evaluator's structured feedback
pub const REFINE_TEMPLATE: &str = r#"You are revising revision {{revision}} of a {{style}} article that did not pass editorial review.

## Topic
{{topic}}

## Requirements
- Length: about {{target_length}} words.
- Style: {{style_guidance}}.
- Keywords: {{keywords}}.

## Reviewer feedback (address every point)
{{feedback}}

## Research notes
{{research_notes}}

## Previous draft
{{previous_draft}}

Return the complete revised article in markdown, not a list of changes.
"#;

/// Quality review: ask a judge model for per-criterion scores
pub const JUDGE_TEMPLATE: &str = r#"You are a strict editor scoring an article draft.

## Brief
- Topic: {{topic}}
- Target length: {{target_length}} words
- Style: {{style}}
- Keywords: {{keywords}}

## Research notes
{{research_notes}}

## Criteria
Score each criterion from 0.0 (unacceptable) to 1.0 (excellent):
{{criteria}}

## Draft
{{text}}

Respond with a single JSON object and nothing else. Use each criterion name as a
key, mapping to an object with a numeric "score" and a short actionable "note":
{
  "clarity": {"score": 0.8, "note": "..."}
}
"#;

/// Format stage: turn the accepted draft into publishable content
pub const FORMAT_TEMPLATE: &str = r#"You are preparing an approved draft for publication.

## Topic
{{topic}}

## Keywords
{{keywords}}

## Selected asset
{{asset}}

## Draft
{{draft}}

Respond with a single JSON object with these fields:
- "title": a headline under 80 characters
- "summary": one or two sentences for previews and search results
- "body_markdown": the final article body in markdown; reference the asset if one is given
"#;
