//! The query path: retrieve, assemble, generate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{render, AssembledContext, ContextAssembler, ContextPassage, TemplateSet};
use crate::error::{Error, Result};
use crate::generate::Generator;
use crate::models::SourceLabel;
use crate::retrieve::{RetrievedPassage, Retriever};

/// Response used when no passage is retrieved. `{question}` is substituted.
pub const DEFAULT_NO_CONTEXT_RESPONSE: &str =
    "I could not find anything in the ingested documents that answers: {question}";

/// A question with optional per-query overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub template: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// Everything decided before the generator is called.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub template: String,
    pub retrieved: Vec<RetrievedPassage>,
    /// `None` when nothing relevant was retrieved or nothing fit the budget.
    pub context: Option<AssembledContext>,
}

/// Final answer with attribution.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceLabel>,
    pub passages: Vec<ContextPassage>,
    pub template: String,
    /// `false` when the no-context response was returned instead.
    pub generated: bool,
}

pub struct QaPipeline {
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: Arc<dyn Generator>,
    templates: TemplateSet,
    temperature: f32,
    no_context_response: String,
}

impl QaPipeline {
    pub fn new(
        retriever: Retriever,
        assembler: ContextAssembler,
        generator: Arc<dyn Generator>,
        templates: TemplateSet,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator,
            templates,
            temperature: 0.1,
            no_context_response: DEFAULT_NO_CONTEXT_RESPONSE.to_string(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_no_context_response(mut self, response: impl Into<String>) -> Self {
        self.no_context_response = response.into();
        self
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieve and assemble without calling the generator.
    ///
    /// The template is resolved first so an unknown name fails before any
    /// embedding call.
    pub async fn plan(&self, request: &QueryRequest) -> Result<QueryPlan> {
        if request.question.trim().is_empty() {
            return Err(Error::EmptyQuestion);
        }
        let template = self.templates.get(request.template.as_deref())?;
        let k = request.k.unwrap_or(self.retriever.params().k);

        let retrieved = self.retriever.retrieve(&request.question, k).await?;
        let context = if retrieved.is_empty() {
            None
        } else {
            Some(self.assembler.assemble(&retrieved, template, &request.question))
                .filter(|c| !c.is_empty())
        };

        Ok(QueryPlan {
            template: template.name().to_string(),
            retrieved,
            context,
        })
    }

    /// Answer `request`, calling the generator only when context was found.
    pub async fn answer(&self, request: &QueryRequest) -> Result<Answer> {
        let plan = self.plan(request).await?;

        let Some(context) = plan.context else {
            tracing::info!("no relevant passages; returning the no-context response");
            return Ok(Answer {
                answer: render(&self.no_context_response, &[("question", &request.question)]),
                sources: Vec::new(),
                passages: Vec::new(),
                template: plan.template,
                generated: false,
            });
        };

        tracing::info!(
            model = self.generator.model_id(),
            template = %plan.template,
            passages = context.passages.len(),
            "generating answer"
        );
        let answer = self.generator.generate(&context.prompt, self.temperature).await?;

        Ok(Answer {
            answer: answer.trim().to_string(),
            sources: context.sources(),
            passages: context.passages,
            template: plan.template,
            generated: true,
        })
    }
}
