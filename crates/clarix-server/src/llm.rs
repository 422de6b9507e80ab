//! SQL synthesis: prompt -> language model -> one clean statement

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use clarix_prompt::PromptText;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ModelConfig;

/// First fenced block; the language tag line is optional
static FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)```").expect("valid fence pattern")
});

/// Leading words a DuckDB statement can start with
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "FROM", "VALUES", "TABLE", "SUMMARIZE", "DESCRIBE", "SHOW", "EXPLAIN",
    "PIVOT", "UNPIVOT", "PRAGMA", "CALL", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP",
    "ALTER", "COPY", "SET",
];

/// Words that can open a later paragraph of the same statement
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "QUALIFY", "WINDOW", "LIMIT", "OFFSET", "JOIN",
    "LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL", "POSITIONAL", "ASOF",
    "ANTI", "SEMI", "ON", "USING", "AND", "OR", "NOT", "UNION", "INTERSECT", "EXCEPT", "AS",
    "CASE", "WHEN", "THEN", "ELSE", "END",
];

/// Second words that turn a Titlecase keyword into the start of a sentence
const PROSE_FOLLOWERS: &[&str] = &[
    "the", "a", "an", "this", "that", "these", "those", "it", "its", "your", "our", "my",
    "we", "you", "i", "here", "below", "above", "following",
];

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model returned no usable SQL")]
    EmptyResponse,
}

/// Text-in/text-out access to a language model
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, SynthesisError>;
}

/// OpenAI-compatible chat completions endpoint
pub struct OpenAiCompletionModel {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompletionModel {
    pub fn new(api_key: String, config: &ModelConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base);
        }

        Self {
            client: Client::with_config(openai_config),
            model: config.name.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompletionModel {
    async fn complete(&self, prompt: &str) -> Result<String, SynthesisError> {
        // Single user turn; no history is carried between calls
        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| SynthesisError::ModelUnavailable(e.to_string()))?,
        )];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_completion_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build()
            .map_err(|e| SynthesisError::ModelUnavailable(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| SynthesisError::ModelUnavailable(e.to_string()))?;

        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default())
    }
}

/// Model output reduced to a single candidate statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedStatement(String);

impl SynthesizedStatement {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SynthesizedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct SqlSynthesizer {
    model: Arc<dyn CompletionModel>,
    timeout: Duration,
}

impl SqlSynthesizer {
    pub fn new(model: Arc<dyn CompletionModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn synthesize(
        &self,
        prompt: &PromptText,
    ) -> Result<SynthesizedStatement, SynthesisError> {
        let raw = tokio::time::timeout(self.timeout, self.model.complete(prompt.as_str()))
            .await
            .map_err(|_| {
                SynthesisError::ModelUnavailable(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f64()
                ))
            })??;

        tracing::debug!(raw = %raw, "LLM response");
        extract_statement(&raw)
    }
}

/// Reduce free-form model output to one statement
///
/// Best effort, not a parser: takes the first fenced block if there is one,
/// skips prose before the first line that starts like a statement, keeps
/// everything up to the first top-level `;` and, for unfenced output, drops
/// trailing paragraphs whose first line does not read like SQL.
pub fn extract_statement(raw: &str) -> Result<SynthesizedStatement, SynthesisError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(SynthesisError::EmptyResponse);
    }

    let (body, fenced) = match FENCE_REGEX.captures(text).and_then(|c| c.get(1)) {
        Some(block) => (block.as_str().to_string(), true),
        None => (strip_unclosed_fence(text).to_string(), false),
    };
    let body = body.replace("```", "").replace("\r\n", "\n");

    let body = skip_leading_commentary(&body).ok_or(SynthesisError::EmptyResponse)?;
    let statement = first_statement(body);
    let statement = if fenced {
        statement
    } else {
        trim_trailing_prose(statement)
    };

    let statement = statement.trim();
    if statement.is_empty() {
        return Err(SynthesisError::EmptyResponse);
    }

    Ok(SynthesizedStatement(statement.to_string()))
}

fn strip_unclosed_fence(text: &str) -> &str {
    if text.starts_with("```") {
        text.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        text
    }
}

fn leading_word(line: &str) -> &str {
    line.trim_start()
        .trim_start_matches('(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
}

fn is_keyword(word: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

/// `Here is the query:` or `With the rules above, ...`
fn reads_like_prose(line: &str) -> bool {
    let line = line.trim();
    if line.ends_with(':') {
        return true;
    }

    let mut words = line.split_whitespace();
    let first = words.next().unwrap_or("");
    let mut chars = first.chars();
    let titlecase = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && first.len() > 1
        && chars.all(|c| c.is_ascii_lowercase());
    if !titlecase {
        return false;
    }

    words
        .next()
        .map(|w| w.trim_end_matches([',', '.']).to_ascii_lowercase())
        .is_some_and(|w| PROSE_FOLLOWERS.contains(&w.as_str()))
}

fn starts_like_statement(line: &str) -> bool {
    is_keyword(leading_word(line), STATEMENT_KEYWORDS) && !reads_like_prose(line)
}

/// First line of a paragraph that belongs to the statement above it
fn continues_statement(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with(['(', ')', ',', '-', '/']) {
        return true;
    }
    let word = leading_word(trimmed);
    (is_keyword(word, STATEMENT_KEYWORDS) || is_keyword(word, CLAUSE_KEYWORDS))
        && !reads_like_prose(trimmed)
}

/// Cut at the first blank line followed by a paragraph of prose
fn trim_trailing_prose(sql: &str) -> &str {
    let mut search = 0;
    while let Some(pos) = sql[search..].find("\n\n") {
        let gap = search + pos;
        let next_line = sql[gap..].trim_start().lines().next().unwrap_or("");
        if !next_line.is_empty() && !continues_statement(next_line) {
            return &sql[..gap];
        }
        search = gap + 2;
    }
    sql
}

/// Slice from the first statement-like line, `None` if there is none
fn skip_leading_commentary(body: &str) -> Option<&str> {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if starts_like_statement(line) {
            return Some(&body[offset..]);
        }
        offset += line.len();
    }
    None
}

/// Text before the first `;` outside quotes and comments
fn first_statement(sql: &str) -> &str {
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_single {
            if b == b'\'' {
                in_single = false;
            }
        } else if in_double {
            if b == b'"' {
                in_double = false;
            }
        } else {
            match b {
                b'\'' => in_single = true,
                b'"' => in_double = true,
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        i += 1;
                    }
                    i += 2;
                    continue;
                }
                b';' => return &sql[..i],
                _ => {}
            }
        }
        i += 1;
    }

    sql
}
