//! Budgeted context assembly and prompt templates.
//!
//! Passages are rendered as `[<label>]\n<text>` and joined with a blank
//! line. The budget counts characters of that whole rendered block, so the
//! generator never receives more than configured no matter how labels and
//! separators add up.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::SourceLabel;
use crate::retrieve::RetrievedPassage;

/// Smallest accepted context budget, in characters.
pub const MIN_CONTEXT_BUDGET: usize = 64;

const SEPARATOR: &str = "\n\n";

/// Substitute `{name}` placeholders in one left-to-right pass.
///
/// Inserted values are never scanned again, so a value containing
/// `{question}` is emitted literally. Unknown placeholders are left as-is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let hit = values
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A named prompt body with `{context}` and `{question}` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    body: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let body = body.into();
        for slot in ["{context}", "{question}"] {
            if !body.contains(slot) {
                return Err(Error::configuration(format!(
                    "template '{}' is missing the {} placeholder",
                    name, slot
                )));
            }
        }
        Ok(Self { name, body })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn render(&self, context: &str, question: &str) -> String {
        render(&self.body, &[("context", context), ("question", question)])
    }
}

/// The configured templates plus the name used when a query names none.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: BTreeMap<String, PromptTemplate>,
    default: String,
}

impl TemplateSet {
    pub fn new(templates: Vec<PromptTemplate>, default: impl Into<String>) -> Result<Self> {
        let default = default.into();
        let templates: BTreeMap<String, PromptTemplate> = templates
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        if !templates.contains_key(&default) {
            return Err(Error::configuration(format!(
                "default template '{}' is not defined",
                default
            )));
        }
        Ok(Self { templates, default })
    }

    /// Look up `name`, or the default template when `None`.
    pub fn get(&self, name: Option<&str>) -> Result<&PromptTemplate> {
        let name = name.unwrap_or(&self.default);
        self.templates
            .get(name)
            .ok_or_else(|| Error::UnknownTemplate(name.to_string()))
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

/// A passage as it appears in the assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPassage {
    pub label: SourceLabel,
    pub text: String,
    pub score: f32,
    /// Whether `text` was cut to fit the budget.
    pub truncated: bool,
}

/// The packed context block and the prompt built from it.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub passages: Vec<ContextPassage>,
    pub block: String,
    pub prompt: String,
    pub budget: usize,
}

impl AssembledContext {
    /// Labels of the included passages, in context order.
    pub fn sources(&self) -> Vec<SourceLabel> {
        self.passages.iter().map(|p| p.label.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.block.chars().count()
    }
}

/// Packs retrieved passages into a character budget.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    budget: usize,
}

impl ContextAssembler {
    pub fn new(budget: usize) -> Result<Self> {
        if budget < MIN_CONTEXT_BUDGET {
            return Err(Error::configuration(format!(
                "context budget must be at least {} characters, got {}",
                MIN_CONTEXT_BUDGET, budget
            )));
        }
        Ok(Self { budget })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Greedily pack `passages` by descending score and fill `template`.
    ///
    /// A passage that would overflow the budget is skipped and later, smaller
    /// ones are still tried. Only the top-ranked passage is ever truncated.
    pub fn assemble(
        &self,
        passages: &[RetrievedPassage],
        template: &PromptTemplate,
        question: &str,
    ) -> AssembledContext {
        let mut ranked: Vec<&RetrievedPassage> = passages.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut used = 0usize;
        let mut included = Vec::new();
        for (rank, passage) in ranked.into_iter().enumerate() {
            let label = passage.label.clone();
            let header = label.to_string().chars().count() + 3;
            let separator = if included.is_empty() { 0 } else { SEPARATOR.len() };
            let text_len = passage.chunk.text.chars().count();
            let cost = separator + header + text_len;

            if used + cost <= self.budget {
                used += cost;
                included.push(ContextPassage {
                    label,
                    text: passage.chunk.text.clone(),
                    score: passage.score,
                    truncated: false,
                });
            } else if rank == 0 {
                if header >= self.budget {
                    tracing::warn!(
                        label = %label,
                        budget = self.budget,
                        "source label alone exceeds the context budget, skipping top passage"
                    );
                    continue;
                }
                let text = truncate_at_word(&passage.chunk.text, self.budget - header);
                if text.is_empty() {
                    continue;
                }
                used += header + text.chars().count();
                included.push(ContextPassage {
                    label,
                    text,
                    score: passage.score,
                    truncated: true,
                });
            }
        }

        let block = included
            .iter()
            .map(|p| format!("[{}]\n{}", p.label, p.text))
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        debug_assert!(block.chars().count() <= self.budget);

        tracing::debug!(
            passages = included.len(),
            chars = used,
            budget = self.budget,
            "assembled context"
        );

        AssembledContext {
            prompt: template.render(&block, question),
            passages: included,
            block,
            budget: self.budget,
        }
    }
}

/// Longest prefix of `text` of at most `max_chars` characters ending at a
/// word boundary. Falls back to a hard cut when the first word is too long.
fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    let next_is_space = text
        .chars()
        .nth(max_chars)
        .is_some_and(char::is_whitespace);
    if next_is_space {
        return prefix.trim_end().to_string();
    }
    match prefix.rfind(char::is_whitespace) {
        Some(pos) => prefix[..pos].trim_end().to_string(),
        None => prefix,
    }
}
