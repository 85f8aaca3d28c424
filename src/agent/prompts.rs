//! Prompt templates for the control loop

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{Error, Result};

/// A prompt template using Handlebars syntax
pub struct PromptTemplate {
    /// Template name
    name: String,
    /// Handlebars registry
    registry: Handlebars<'static>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();

        registry
            .register_template_string(&name, template)
            .map_err(|e| Error::Internal(format!("Invalid template: {}", e)))?;

        Ok(PromptTemplate { name, registry })
    }

    /// Render the template with given data
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        self.registry
            .render(&self.name, data)
            .map_err(|e| Error::Internal(format!("Template render error: {}", e)))
    }
}

// Triple braces throughout: question/context text must not be HTML-escaped.

const GRADE_TEMPLATE: &str = "\
You are a grader assessing relevance of a retrieved document to a user question.
Here is the retrieved document:

{{{context}}}

Here is the user question:
{{{question}}}
If the document is relevant, output 'yes', otherwise output 'no'.";

const REWRITE_TEMPLATE: &str = "\
Look at the input question and infer the user's intent.
Initial question:
{{{question}}}
Rewrite it into a clearer, search-friendly question.";

const GENERATE_TEMPLATE: &str = "\
You are an assistant for question-answering tasks.
Use the following retrieved context to answer the question.
If you don't know, say you don't know.
Use three sentences maximum and keep the answer concise.

Question:
{{{question}}}

Context:
{{{context}}}";

#[derive(Serialize)]
struct QuestionContext<'a> {
    question: &'a str,
    context: &'a str,
}

#[derive(Serialize)]
struct QuestionOnly<'a> {
    question: &'a str,
}

/// The three control-loop prompts, compiled once per agent
pub struct Prompts {
    grade: PromptTemplate,
    rewrite: PromptTemplate,
    generate: PromptTemplate,
}

impl Prompts {
    pub fn new() -> Result<Self> {
        Ok(Prompts {
            grade: PromptTemplate::new("grade", GRADE_TEMPLATE)?,
            rewrite: PromptTemplate::new("rewrite", REWRITE_TEMPLATE)?,
            generate: PromptTemplate::new("generate", GENERATE_TEMPLATE)?,
        })
    }

    /// Binary relevance judgment over retrieved context
    pub fn grade(&self, question: &str, context: &str) -> Result<String> {
        self.grade.render(&QuestionContext { question, context })
    }

    /// Reformulate the original question into a retrieval-friendly form
    pub fn rewrite(&self, question: &str) -> Result<String> {
        self.rewrite.render(&QuestionOnly { question })
    }

    /// Final answer constrained to the retrieved context
    pub fn generate(&self, question: &str, context: &str) -> Result<String> {
        self.generate.render(&QuestionContext { question, context })
    }
}
