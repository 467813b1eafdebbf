// Prompt registry. Each key maps to a system prompt, a user template with
// positional `{0}`, `{1}`, … slots, and the number of arguments it needs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm_client::GenerationError;

static SLOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\d)\}").expect("slot pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptKey {
    RefreshArticle,
    NewArticle,
    SurgicalPatch,
    SectionFaq,
    SectionConclusion,
    CriticGrade,
    CriticRepair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    Html,
    Text,
}

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Fragment appended to every prompt that sees protected content.
pub const PLACEHOLDER_INSTRUCTION: &str = "\
    CRITICAL: Tokens of the form %%PROTECTED_N%% stand for images, tables and embeds. \
    Keep every token exactly once, unchanged, in a sensible position. Never invent new tokens.";

const HTML_SYSTEM: &str = "You are a senior editor who writes clean, semantic HTML body content. \
    Return HTML only: no <html>, <head>, <body> or <h1> tags, no markdown fences, no commentary.";

const REFRESH_ARTICLE: &str = r#"Rewrite the article below so it is accurate and current for {0}.
Title: {1}

Return a JSON object with this EXACT schema:
{"title": "...", "slug": "...", "metaDescription": "...", "htmlBody": "...", "schema": {}}

{placeholder_instruction}

Article body:
{2}"#;

const NEW_ARTICLE: &str = r#"Write a complete, well-researched article for the keyword "{0}", current for {1}.

Return a JSON object with this EXACT schema:
{"title": "...", "slug": "...", "metaDescription": "...", "htmlBody": "...", "schema": {}}"#;

const SURGICAL_PATCH: &str = r#"The article below needs targeted fixes only: {0}.
Current year: {1}

Return a JSON object: {"snippets": [{"find": "exact existing text", "replace": "new text"}]}
Each "find" must be copied verbatim from the article. Return at most 12 snippets.

{placeholder_instruction}

Article body:
{2}"#;

const SECTION_FAQ: &str = r#"Write an FAQ section for the article "{0}".
Start with <h2>Frequently Asked Questions</h2>, then 4-6 questions as <h3> with <p> answers.

Article context:
{1}"#;

const SECTION_CONCLUSION: &str = r#"Write a short conclusion for the article "{0}".
Start with <h2>Conclusion</h2> followed by one or two <p> paragraphs.

Article context:
{1}"#;

const CRITIC_GRADE: &str = r#"Grade the article HTML below for accuracy, readability, structure and helpfulness.
Return JSON: {"score": 0-100, "issues": ["specific issue", "..."]}

{0}"#;

const CRITIC_REPAIR: &str = r#"Fix the issues listed below in the article HTML. Keep everything else intact.

Issues:
{1}

{placeholder_instruction}

Article HTML:
{0}"#;

impl PromptKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKey::RefreshArticle => "refresh_article",
            PromptKey::NewArticle => "new_article",
            PromptKey::SurgicalPatch => "surgical_patch",
            PromptKey::SectionFaq => "section_faq",
            PromptKey::SectionConclusion => "section_conclusion",
            PromptKey::CriticGrade => "critic_grade",
            PromptKey::CriticRepair => "critic_repair",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            PromptKey::RefreshArticle => REFRESH_ARTICLE,
            PromptKey::NewArticle => NEW_ARTICLE,
            PromptKey::SurgicalPatch => SURGICAL_PATCH,
            PromptKey::SectionFaq => SECTION_FAQ,
            PromptKey::SectionConclusion => SECTION_CONCLUSION,
            PromptKey::CriticGrade => CRITIC_GRADE,
            PromptKey::CriticRepair => CRITIC_REPAIR,
        }
    }

    fn arity(&self) -> usize {
        match self {
            PromptKey::RefreshArticle | PromptKey::SurgicalPatch => 3,
            PromptKey::NewArticle
            | PromptKey::SectionFaq
            | PromptKey::SectionConclusion
            | PromptKey::CriticRepair => 2,
            PromptKey::CriticGrade => 1,
        }
    }
}

/// Builds `(system, prompt)` for a key. Wrong argument counts or blank
/// arguments are rejected before any network call.
pub fn render(
    key: PromptKey,
    args: &[String],
    format: OutputFormat,
) -> Result<(&'static str, String), GenerationError> {
    if args.len() != key.arity() {
        return Err(GenerationError::InvalidParams(format!(
            "{} expects {} arguments, got {}",
            key.as_str(),
            key.arity(),
            args.len()
        )));
    }
    if args.iter().any(|a| a.trim().is_empty()) {
        return Err(GenerationError::InvalidParams(format!(
            "{} received a blank argument",
            key.as_str()
        )));
    }

    // Single pass so argument text containing `{1}` is never re-substituted.
    let template = key
        .template()
        .replace("{placeholder_instruction}", PLACEHOLDER_INSTRUCTION);
    let prompt = SLOT
        .replace_all(&template, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| args.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned();

    let system = match format {
        OutputFormat::Json => JSON_ONLY_SYSTEM,
        OutputFormat::Html | OutputFormat::Text => HTML_SYSTEM,
    };
    Ok((system, prompt))
}
