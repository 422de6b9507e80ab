//! The single question -> rows operation offered to agents
//!
//! Composition only: render schema, build prompt, synthesize, execute. Every
//! stage failure is folded into one [`Failure`] carrying the stage label.

use clarix_catalog::SchemaCatalog;
use clarix_duck::{ExecutionError, QueryResult};
use clarix_prompt::{BusinessRuleSet, PromptError};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, Instrument};

use crate::llm::{SqlSynthesizer, SynthesisError};
use crate::query::StoreGateway;

pub const TOOL_NAME: &str = "query_tool";

pub const TOOL_DESCRIPTION: &str = "Answer a question about site activity by generating and running SQL \
against the analytics store. Use it when the question mentions signups, leads, registrations or \
installs; a site domain, DMA or PRIZM segment; predicted versus actual figures; or relative time \
such as last month or next week. Returns the SQL that ran and the resulting rows.";

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schema,
    Prompt,
    Synthesize,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Schema => "schema",
            Stage::Prompt => "prompt",
            Stage::Synthesize => "synthesize",
            Stage::Execute => "execute",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{stage} failed: {message}")]
pub struct Failure {
    pub stage: Stage,
    pub message: String,
}

impl Failure {
    fn new(stage: Stage, err: impl fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({ "stage": self.stage, "message": self.message })
    }
}

impl From<PromptError> for Failure {
    fn from(err: PromptError) -> Self {
        Failure::new(Stage::Prompt, err)
    }
}

impl From<SynthesisError> for Failure {
    fn from(err: SynthesisError) -> Self {
        Failure::new(Stage::Synthesize, err)
    }
}

impl From<ExecutionError> for Failure {
    fn from(err: ExecutionError) -> Self {
        Failure::new(Stage::Execute, err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationState {
    Received,
    SchemaRendered,
    PromptBuilt,
    Synthesized,
    Executed,
    Succeeded,
    Failed(Stage),
}

struct Invocation {
    state: InvocationState,
}

impl Invocation {
    fn new() -> Self {
        debug!(state = ?InvocationState::Received, "invocation state");
        Self {
            state: InvocationState::Received,
        }
    }

    fn advance(&mut self, next: InvocationState) {
        debug!(from = ?self.state, to = ?next, "invocation state");
        self.state = next;
    }

    fn fail(&mut self, failure: Failure) -> Failure {
        self.advance(InvocationState::Failed(failure.stage));
        failure
    }
}

/// Statement that ran plus its rows
#[derive(Debug, Clone, PartialEq)]
pub struct TabularResult {
    pub sql: String,
    pub result: QueryResult,
}

impl TabularResult {
    pub fn to_json(&self) -> Value {
        json!({
            "sql": self.sql,
            "columns": self.result.columns,
            "rows": self.result.rows,
            "row_count": self.result.row_count()
        })
    }
}

pub struct QueryTool {
    catalog: Arc<SchemaCatalog>,
    rules: Arc<BusinessRuleSet>,
    synthesizer: SqlSynthesizer,
    store: StoreGateway,
}

impl QueryTool {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        rules: Arc<BusinessRuleSet>,
        synthesizer: SqlSynthesizer,
        store: StoreGateway,
    ) -> Self {
        Self {
            catalog,
            rules,
            synthesizer,
            store,
        }
    }

    pub async fn invoke(&self, question: &str) -> Result<TabularResult, Failure> {
        let invocation_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("invocation", id = %invocation_id);
        self.run(question).instrument(span).await
    }

    async fn run(&self, question: &str) -> Result<TabularResult, Failure> {
        let started = Instant::now();
        let mut invocation = Invocation::new();

        let outcome = self.pipeline(question, &mut invocation).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(tabular) => {
                crate::log_event!(
                    level: tracing::Level::INFO,
                    event: "invocation_succeeded",
                    rows: tabular.result.row_count(),
                    elapsed_ms: elapsed_ms
                );
            }
            Err(failure) => {
                crate::log_event!(
                    level: tracing::Level::WARN,
                    event: "invocation_failed",
                    stage: failure.stage,
                    reason: failure.message,
                    elapsed_ms: elapsed_ms
                );
            }
        }

        outcome
    }

    async fn pipeline(
        &self,
        question: &str,
        invocation: &mut Invocation,
    ) -> Result<TabularResult, Failure> {
        let schema = self.catalog.render();
        if schema.is_empty() {
            return Err(invocation.fail(Failure::new(Stage::Schema, "rendered schema is empty")));
        }
        invocation.advance(InvocationState::SchemaRendered);

        let prompt = clarix_prompt::build(question, &schema, &self.rules)
            .map_err(|e| invocation.fail(e.into()))?;
        invocation.advance(InvocationState::PromptBuilt);

        let statement = self
            .synthesizer
            .synthesize(&prompt)
            .await
            .map_err(|e| invocation.fail(e.into()))?;
        invocation.advance(InvocationState::Synthesized);
        debug!(sql = %statement, "synthesized statement");

        let result = self
            .store
            .execute(&statement)
            .await
            .map_err(|e| invocation.fail(e.into()))?;
        invocation.advance(InvocationState::Executed);

        invocation.advance(InvocationState::Succeeded);
        Ok(TabularResult {
            sql: statement.to_string(),
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionModel;
    use async_trait::async_trait;
    use clarix_duck::{CatalogLoader, QueryExecutor, StoreDescriptor};
    use std::sync::Mutex;
    use std::time::Duration;

    const SCHEMA: &str = r#"{
        "hitcount": [
            {"column": "hit_date", "type": "DATE"},
            {"column": "site_domain", "type": "VARCHAR"},
            {"column": "action_type", "type": "VARCHAR"},
            {"column": "hits", "type": "INTEGER"}
        ]
    }"#;

    /// Returns canned text and remembers the prompt it was given
    struct ScriptedModel {
        reply: String,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: "SELECT 1".to_string(),
                delay,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, SynthesisError> {
            self.seen.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }
    }

    fn populated_store(dir: &tempfile::TempDir) -> StoreDescriptor {
        let src = dir.path().join("data");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(
            src.join("hitcount.csv"),
            "hit_date,site_domain,action_type,hits\n\
             2025-01-04,RedCrossBlood.org,signup,12\n\
             2025-01-18,redcrossblood.org ,Signup,7\n\
             2025-01-20,RedCrossBlood.org,lead,40\n\
             2025-02-11,RedCrossBlood.org,signup,5\n",
        )
        .unwrap();
        let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
        let report = CatalogLoader::new().materialize(&src, &store).unwrap();
        assert!(report.is_complete());
        store
    }

    fn tool(
        model: Arc<ScriptedModel>,
        store: StoreDescriptor,
        model_timeout: Duration,
    ) -> QueryTool {
        QueryTool::new(
            Arc::new(SchemaCatalog::from_json_str(SCHEMA).unwrap()),
            Arc::new(BusinessRuleSet::builtin()),
            SqlSynthesizer::new(model, model_timeout),
            StoreGateway::new(QueryExecutor::new(store), Duration::from_secs(10)),
        )
    }

    #[tokio::test]
    async fn test_signups_question_returns_uniform_rows() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying(
            "```sql\n\
             SELECT hitcount.hit_date, SUM(hitcount.hits) AS signups\n\
             FROM hitcount\n\
             WHERE LOWER(TRIM(hitcount.action_type)) LIKE LOWER('%signup%')\n\
               AND LOWER(TRIM(hitcount.site_domain)) LIKE LOWER('%RedCrossBlood.org%')\n\
               AND hitcount.hit_date >= DATE '2025-01-01' AND hitcount.hit_date < DATE '2025-02-01'\n\
             GROUP BY hitcount.hit_date\n\
             ORDER BY hitcount.hit_date;\n\
             ```",
        );
        let tool = tool(model.clone(), populated_store(&dir), Duration::from_secs(5));

        let tabular = tool
            .invoke("How many signups came from RedCrossBlood.org last month?")
            .await
            .unwrap();

        assert!(!tabular.sql.contains('`'));
        assert_eq!(tabular.result.row_count(), 2);
        for row in &tabular.result.rows {
            let keys: Vec<&String> = row.keys().collect();
            assert_eq!(keys, tabular.result.columns.iter().collect::<Vec<_>>());
        }
        assert_eq!(tabular.result.rows[0]["hit_date"], json!("2025-01-04"));
        assert_eq!(tabular.result.rows[1]["signups"], json!(7));

        let json = tabular.to_json();
        assert_eq!(json["row_count"], 2);
        assert_eq!(json["columns"], json!(["hit_date", "signups"]));

        let prompts = model.seen.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Table: hitcount"));
        assert!(prompts[0].contains(&BusinessRuleSet::builtin().render()));
    }

    #[tokio::test]
    async fn test_unknown_column_fails_at_execute() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("SELECT hitcount.conversions FROM hitcount");
        let tool = tool(model, populated_store(&dir), Duration::from_secs(5));

        let failure = tool.invoke("How many conversions?").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Execute);
        assert!(!failure.message.is_empty());
        assert_eq!(failure.to_json()["stage"], json!("execute"));
    }

    #[tokio::test]
    async fn test_model_timeout_fails_at_synthesize_within_bound() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::slow(Duration::from_secs(60));
        let tool = tool(model, populated_store(&dir), Duration::from_millis(100));

        let started = Instant::now();
        let failure = tool.invoke("How many leads?").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Synthesize);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_blank_question_fails_at_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("SELECT 1");
        let tool = tool(model.clone(), populated_store(&dir), Duration::from_secs(5));

        let failure = tool.invoke("   ").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Prompt);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prose_only_reply_fails_at_synthesize() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("I'm not sure which table holds that.");
        let tool = tool(model, populated_store(&dir), Duration::from_secs(5));

        let failure = tool.invoke("What is the weather?").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Synthesize);
    }

    #[tokio::test]
    async fn test_empty_result_is_success_not_failure() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying(
            "SELECT hitcount.hits FROM hitcount WHERE hitcount.hit_date > DATE '2030-01-01'",
        );
        let tool = tool(model, populated_store(&dir), Duration::from_secs(5));

        let tabular = tool.invoke("Hits after 2030?").await.unwrap();
        assert_eq!(tabular.result.row_count(), 0);
        assert_eq!(tabular.result.columns, vec!["hits"]);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Synthesize.to_string(), "synthesize");
        assert_eq!(serde_json::to_value(Stage::Execute).unwrap(), json!("execute"));
        let failure = Failure::from(SynthesisError::EmptyResponse);
        assert_eq!(failure.stage, Stage::Synthesize);
    }
}
