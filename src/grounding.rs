//! Hand-off from retrieval to the answer-generation backend.
//!
//! A [`QueryContext`] is turned into a [`GroundingRequest`]: the system
//! instruction, the query, a domain hint, the labelled passages and the
//! deduplicated sources. The request is backend-neutral; the configured
//! [`AnswerBackend`] only decides which external model receives it.

use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::Serialize;

use crate::{
    domain::{Domain, domain_mask, domains_from_mask},
    error::{Error, Result},
    retrieval::{ContextPassage, QueryContext},
};

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Separator between passage blocks in the rendered context.
pub const PASSAGE_SEPARATOR: &str = "\n---\n";

const DETAILED_INSTRUCTION: &str = "You answer questions about enterprise software using only the \
manual excerpts provided as context. Combine information from several excerpts when they cover \
the same workflow. Give navigation paths as Menu -> Submenu -> Option, number the steps of a \
procedure and put the names of buttons, fields and menu items in bold. If the excerpts describe a \
feature, explain how to use it. Say that information is missing only after checking every \
excerpt. End the answer with a Sources list naming each document and page once.";

const CONCISE_INSTRUCTION: &str = "Answer using only the manual excerpts provided as context. \
Use the manuals' terminology, number the steps, bold UI element names, say clearly when \
information is missing and end with source citations.";

/// External model that turns a grounding request into an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerBackend {
    OpenAi { model: String },
    Claude { model: String },
}

impl AnswerBackend {
    pub fn name(&self) -> &'static str {
        match self {
            AnswerBackend::OpenAi { .. } => "openai",
            AnswerBackend::Claude { .. } => "claude",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            AnswerBackend::OpenAi { model } | AnswerBackend::Claude { model } => model,
        }
    }
}

impl Default for AnswerBackend {
    fn default() -> Self {
        AnswerBackend::Claude {
            model: DEFAULT_CLAUDE_MODEL.to_string(),
        }
    }
}

/// Parses `openai`, `claude`, or either name followed by `:<model>`.
impl FromStr for AnswerBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, model) = match s.trim().split_once(':') {
            Some((name, model)) => (name, Some(model.trim())),
            None => (s.trim(), None),
        };
        if model.is_some_and(str::is_empty) {
            return Err(Error::Config(format!(
                "answer backend '{s}' has an empty model name"
            )));
        }

        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(AnswerBackend::OpenAi {
                model: model.unwrap_or(DEFAULT_OPENAI_MODEL).to_string(),
            }),
            "claude" => Ok(AnswerBackend::Claude {
                model: model.unwrap_or(DEFAULT_CLAUDE_MODEL).to_string(),
            }),
            _ => Err(Error::Config(format!(
                "unknown answer backend '{s}' (expected openai or claude)"
            ))),
        }
    }
}

impl fmt::Display for AnswerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name(), self.model())
    }
}

/// How much guidance the system instruction carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptStyle {
    #[default]
    Detailed,
    Concise,
}

impl PromptStyle {
    pub fn instruction(self) -> &'static str {
        match self {
            PromptStyle::Detailed => DETAILED_INSTRUCTION,
            PromptStyle::Concise => CONCISE_INSTRUCTION,
        }
    }
}

/// A cited document page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Source {
    pub document: String,
    pub page: Option<usize>,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}, page {page}", self.document),
            None => f.write_str(&self.document),
        }
    }
}

fn source_label(passage: &ContextPassage) -> String {
    let mut label = format!("SOURCE: {}", passage.relative_path);
    if let Some(page) = passage.page {
        label.push_str(&format!(" | PAGE: {page}"));
    }
    if let Some(section) = &passage.section {
        label.push_str(&format!(" | SECTION: {section}"));
    }
    label
}

/// Render passages as labelled blocks, in order, separated by `---`.
pub fn format_context(passages: &[ContextPassage]) -> String {
    passages
        .iter()
        .map(|p| format!("{}\n{}", source_label(p), p.text.trim()))
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

/// Sources of `passages` in first-cited order, each (document, page) once.
pub fn format_sources(passages: &[ContextPassage]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for passage in passages {
        let source = Source {
            document: passage.relative_path.clone(),
            page: passage.page,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

/// Everything the answer backend needs to produce a grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct GroundingRequest {
    pub backend: String,
    pub model: String,
    pub instruction: String,
    pub query: String,
    pub domain_hint: String,
    pub context: String,
    pub sources: Vec<Source>,
}

impl GroundingRequest {
    pub fn new(
        backend: &AnswerBackend,
        context: &QueryContext,
        style: PromptStyle,
    ) -> Self {
        Self {
            backend: backend.name().to_string(),
            model: backend.model().to_string(),
            instruction: style.instruction().to_string(),
            query: context.query.trim().to_string(),
            domain_hint: context.domain_hint(),
            context: format_context(&context.passages),
            sources: format_sources(&context.passages),
        }
    }

    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }

    /// The user turn sent to the model: hint, excerpts and question.
    pub fn user_message(&self) -> String {
        let mut message = String::new();
        if !self.domain_hint.is_empty() {
            message.push_str(&self.domain_hint);
            message.push_str("\n\n");
        }
        if self.has_context() {
            message.push_str("Context:\n");
            message.push_str(&self.context);
        } else {
            message.push_str("Context:\n(no matching excerpts were found)");
        }
        message.push_str("\n\nQuestion: ");
        message.push_str(&self.query);
        message
    }
}

/// Seam for the external answer-generation call.
pub trait AnswerGenerator {
    fn backend(&self) -> &AnswerBackend;

    fn generate(&mut self, request: &GroundingRequest) -> Result<String>;
}

/// Generator that performs no model call and returns the full prompt it
/// would send.
#[derive(Debug, Clone, Default)]
pub struct DryRunGenerator {
    backend: AnswerBackend,
}

impl DryRunGenerator {
    pub fn new(backend: AnswerBackend) -> Self {
        Self { backend }
    }
}

impl AnswerGenerator for DryRunGenerator {
    fn backend(&self) -> &AnswerBackend {
        &self.backend
    }

    fn generate(&mut self, request: &GroundingRequest) -> Result<String> {
        Ok(format!(
            "[{}]\n{}\n\n{}",
            self.backend,
            request.instruction,
            request.user_message()
        ))
    }
}

/// Per-query overview of what was retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct RetrievalSummary {
    pub documents_found: usize,
    /// Domains of the retrieved passages.
    pub domains: Vec<Domain>,
    /// Distinct source files, in first-cited order.
    pub files: Vec<String>,
    pub domain_hint: String,
}

pub fn summarize(context: &QueryContext) -> RetrievalSummary {
    let mask = context
        .passages
        .iter()
        .fold(0, |mask, p| mask | domain_mask(&p.domains));

    let mut files: Vec<String> = Vec::new();
    for passage in &context.passages {
        if !files.contains(&passage.relative_path) {
            files.push(passage.relative_path.clone());
        }
    }

    RetrievalSummary {
        documents_found: context.passages.len(),
        domains: domains_from_mask(mask),
        files,
        domain_hint: context.domain_hint(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(
        rank: usize,
        path: &str,
        page: Option<usize>,
        section: Option<&str>,
        text: &str,
    ) -> ContextPassage {
        ContextPassage {
            rank,
            chunk_id: rank as u64,
            document_id: "#abcdef".into(),
            document_title: path.trim_end_matches(".pdf").into(),
            relative_path: path.into(),
            section: section.map(String::from),
            page,
            chunk_index: rank - 1,
            start_char: 0,
            end_char: text.len(),
            domains: vec![Domain::Claims],
            similarity: 0.5,
            relevance: Some(1.0),
            text: text.into(),
        }
    }

    fn context(passages: Vec<ContextPassage>) -> QueryContext {
        QueryContext {
            query: "  How do I submit a claim? ".into(),
            domains: vec![Domain::Claims],
            filter: Vec::new(),
            fallback_used: false,
            passages,
        }
    }

    #[test]
    fn parses_answer_backends() {
        assert_eq!(
            "openai".parse::<AnswerBackend>().unwrap(),
            AnswerBackend::OpenAi {
                model: DEFAULT_OPENAI_MODEL.into()
            }
        );
        assert_eq!(
            "Claude".parse::<AnswerBackend>().unwrap(),
            AnswerBackend::default()
        );
        assert_eq!(
            "openai:gpt-4o-mini".parse::<AnswerBackend>().unwrap().model(),
            "gpt-4o-mini"
        );
        assert!(matches!(
            "gemini".parse::<AnswerBackend>(),
            Err(Error::Config(_))
        ));
        assert!("claude:".parse::<AnswerBackend>().is_err());
    }

    #[test]
    fn backend_display_roundtrips() {
        let backend: AnswerBackend = "openai:gpt-4.1".parse().unwrap();
        assert_eq!(backend.to_string(), "openai:gpt-4.1");
        assert_eq!(backend.to_string().parse::<AnswerBackend>().unwrap(), backend);
    }

    #[test]
    fn context_blocks_carry_labels() {
        let rendered = format_context(&[
            passage(1, "Claims.pdf", Some(3), Some("Submitting"), "Press Submit.\n"),
            passage(2, "notes.md", None, None, "Check the queue."),
        ]);
        assert_eq!(
            rendered,
            "SOURCE: Claims.pdf | PAGE: 3 | SECTION: Submitting\nPress Submit.\
             \n---\nSOURCE: notes.md\nCheck the queue."
        );
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn sources_are_deduplicated_in_order() {
        let sources = format_sources(&[
            passage(1, "b.pdf", Some(2), None, "x"),
            passage(2, "a.pdf", Some(1), None, "y"),
            passage(3, "b.pdf", Some(2), None, "z"),
            passage(4, "b.pdf", Some(5), None, "w"),
        ]);
        let rendered: Vec<String> = sources.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["b.pdf, page 2", "a.pdf, page 1", "b.pdf, page 5"]);
    }

    #[test]
    fn request_collects_query_hint_and_sources() {
        let ctx = context(vec![passage(1, "Claims.pdf", Some(1), None, "Press Submit.")]);
        let request =
            GroundingRequest::new(&AnswerBackend::default(), &ctx, PromptStyle::Detailed);

        assert_eq!(request.backend, "claude");
        assert_eq!(request.model, DEFAULT_CLAUDE_MODEL);
        assert_eq!(request.query, "How do I submit a claim?");
        assert!(request.domain_hint.contains("claims processing"));
        assert_eq!(request.sources.len(), 1);

        let message = request.user_message();
        assert!(message.starts_with("This question relates to claims"));
        assert!(message.contains("SOURCE: Claims.pdf | PAGE: 1"));
        assert!(message.ends_with("Question: How do I submit a claim?"));
    }

    #[test]
    fn empty_context_is_stated() {
        let request = GroundingRequest::new(
            &AnswerBackend::default(),
            &context(Vec::new()),
            PromptStyle::Concise,
        );
        assert!(!request.has_context());
        assert!(request.sources.is_empty());
        assert!(request.user_message().contains("no matching excerpts"));
        assert_eq!(request.instruction, CONCISE_INSTRUCTION);
    }

    #[test]
    fn dry_run_returns_prompt() {
        let ctx = context(vec![passage(1, "Claims.pdf", None, None, "Press Submit.")]);
        let mut generator = DryRunGenerator::new("openai".parse().unwrap());
        let request = GroundingRequest::new(generator.backend(), &ctx, PromptStyle::Detailed);

        let answer = generator.generate(&request).unwrap();
        assert!(answer.starts_with("[openai:gpt-4o]\n"));
        assert!(answer.contains(DETAILED_INSTRUCTION));
        assert!(answer.contains("Press Submit."));
    }

    #[test]
    fn summary_lists_files_and_domains() {
        let mut second = passage(2, "Print.pdf", Some(4), None, "Print it.");
        second.domains = vec![Domain::Print];
        let ctx = context(vec![
            passage(1, "Claims.pdf", Some(1), None, "Press Submit."),
            second,
            passage(3, "Claims.pdf", Some(2), None, "Then wait."),
        ]);

        let summary = summarize(&ctx);
        assert_eq!(summary.documents_found, 3);
        assert_eq!(summary.domains, vec![Domain::Claims, Domain::Print]);
        assert_eq!(summary.files, vec!["Claims.pdf", "Print.pdf"]);

        let empty = summarize(&context(Vec::new()));
        assert_eq!(empty.documents_found, 0);
        assert!(empty.files.is_empty());
        assert!(!empty.domain_hint.is_empty());
    }
}
