//! Prompt assembly for SQL synthesis
//!
//! Combines a question, the rendered schema and the business rule set into
//! the single instruction block sent to the language model.

mod builder;
mod rules;

pub use builder::{build, PromptError, PromptText};
pub use rules::{BusinessRuleSet, JoinPath, RuleSetError, TextFilterConvention, VocabularyRule};
