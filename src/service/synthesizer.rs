use crate::api::mistral_api::MistralApi;
use crate::error::PilotError;
use crate::types::mistral::{ChatCompletionRequest, ResponseFormat, WireMessage};
use crate::types::query::{ChatMessage, QueryCandidate};
use tracing::{info, warn};

const OUTPUT_CONTRACT: &str = r#"Always respond with a single JSON object with exactly these keys:
{
  "sqlQuery": "...",
  "title": "...",
  "explanation": "..."
}
- sqlQuery: the PostgreSQL statement, formatted with newlines and indentation.
- title: a short title for the query.
- explanation: a brief explanation of what the query does."#;

const GROUNDING_RULES: &str = "Write syntactically correct PostgreSQL.
Use the exact table and column names from the schema above. Never invent tables or columns.
If the request cannot be expressed in SQL, say that you can only help with SQL queries.
If the data cannot be retrieved from this schema, say so; leave sqlQuery empty in both cases.";

const RETRIEVAL_ONLY_RULES: &str = "Only data retrieval is allowed: sqlQuery must begin with SELECT.
Refuse any request to insert, modify, delete or restructure data, leaving sqlQuery empty.";

/// Build the system instruction. `schema_text` is the only schema context the model gets.
pub fn system_prompt(schema_text: &str, safe_mode: bool) -> String {
    let task = if safe_mode {
        "help the user write a SQL query that retrieves the data they need"
    } else {
        "help the user write a SQL query that fulfils their request"
    };
    let mut prompt = format!(
        "You are a PostgreSQL expert. Your job is to {task}.\n\
         The database schema is as follows:\n\n{schema_text}\n\n"
    );
    if safe_mode {
        prompt.push_str(RETRIEVAL_ONLY_RULES);
        prompt.push_str("\n\n");
    }
    prompt.push_str(GROUNDING_RULES);
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_CONTRACT);
    prompt.push('\n');
    prompt
}

/// Parse the model's text into a candidate. Any missing or mistyped field
/// fails the whole call; there is no partial fallback.
pub fn parse_candidate(raw: &str) -> Result<QueryCandidate, PilotError> {
    serde_json::from_str::<QueryCandidate>(raw.trim())
        .map_err(|e| PilotError::MalformedOutput(e.to_string()))
}

/// Turns rendered schema plus conversation into a structured SQL candidate.
///
/// Safe mode only changes the instruction text; the returned statement is not
/// checked here.
pub struct QuerySynthesizer<'a> {
    api: &'a MistralApi,
    model: &'a str,
}

impl<'a> QuerySynthesizer<'a> {
    pub fn new(api: &'a MistralApi, model: &'a str) -> Self {
        Self { api, model }
    }

    pub async fn synthesize(
        &self,
        api_key: &str,
        history: &[ChatMessage],
        schema_text: &str,
        safe_mode: bool,
    ) -> Result<QueryCandidate, PilotError> {
        let system = system_prompt(schema_text, safe_mode);
        let request = build_request(self.model, &system, history);

        let response = self.api.chat_completion(api_key, &request).await?;
        let Some(text) = response.first_text() else {
            warn!("model returned no choices");
            return Err(PilotError::MalformedOutput(
                "model returned no content".to_string(),
            ));
        };
        let candidate = parse_candidate(&text)?;
        info!(
            turns = history.len(),
            safe_mode,
            title = %candidate.title,
            "query candidate synthesized"
        );
        Ok(candidate)
    }
}

fn build_request<'r>(
    model: &'r str,
    system: &'r str,
    history: &'r [ChatMessage],
) -> ChatCompletionRequest<'r> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(WireMessage {
        role: "system",
        content: system,
    });
    messages.extend(history.iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));
    ChatCompletionRequest {
        model,
        messages,
        response_format: Some(ResponseFormat::JSON_OBJECT),
        temperature: Some(0.0),
    }
}
