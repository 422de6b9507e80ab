use clarix_catalog::RenderedSchema;
use std::fmt;
use thiserror::Error;

use crate::rules::BusinessRuleSet;

const ROLE_FRAMING: &str = "You are a SQL expert. Given the following database schema and user \
request, generate the best SQL query to answer the question. The database engine is DuckDB.";

const OUTPUT_FORMAT: &str = "OUTPUT FORMAT:\n\
Respond with ONLY the SQL query and nothing else. Return exactly one statement. \
Do not wrap it in markdown code fences, do not add explanations or comments, \
and never return more than one statement.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("question is empty")]
    EmptyQuestion,
}

/// The full instruction block sent to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptText(String);

impl PromptText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PromptText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Assemble the prompt: role, schema, question, rules, output constraint
///
/// The schema text and the rendered rules are embedded whole.
pub fn build(
    question: &str,
    schema: &RenderedSchema,
    rules: &BusinessRuleSet,
) -> Result<PromptText, PromptError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(PromptError::EmptyQuestion);
    }

    let text = format!(
        "{}\n\nSCHEMA:\n{}\n\nUSER REQUEST:\n{}\n\n{}\n{}\n",
        ROLE_FRAMING,
        schema,
        question,
        rules.render(),
        OUTPUT_FORMAT
    );

    Ok(PromptText(text))
}
