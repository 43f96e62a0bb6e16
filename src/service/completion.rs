//! Inline suggestions for the SQL editor, via fill-in-the-middle completion.

use crate::api::mistral_api::MistralApi;
use crate::error::PilotError;
use crate::types::mistral::FimCompletionRequest;
use crate::types::query::CompletionMetadata;
use tracing::debug;

const MAX_SUGGESTION_TOKENS: u32 = 128;

/// Prefix handed to the model: the schema as SQL comments, then the text before the cursor.
pub fn completion_prompt(schema_text: &str, text_before_cursor: &str) -> String {
    let mut prompt = String::from(
        "-- This is a PostgreSQL file. Only reference tables and columns that exist in the schema.\n\
         -- The database schema is as follows:\n",
    );
    for line in schema_text.lines() {
        prompt.push_str("-- ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(text_before_cursor);
    prompt
}

pub async fn suggest(
    api: &MistralApi,
    model: &str,
    api_key: &str,
    metadata: &CompletionMetadata,
    schema_text: &str,
) -> Result<Option<String>, PilotError> {
    let prompt = completion_prompt(schema_text, &metadata.text_before_cursor);
    let suffix = Some(metadata.text_after_cursor.as_str()).filter(|s| !s.is_empty());
    let request = FimCompletionRequest {
        model,
        prompt: &prompt,
        suffix,
        max_tokens: Some(MAX_SUGGESTION_TOKENS),
        temperature: Some(0.0),
        stop: vec!["\n\n"],
    };
    let suggestion = api
        .fim_completion(api_key, &request)
        .await?
        .first_text()
        .filter(|s| !s.trim().is_empty());
    debug!(has_suggestion = suggestion.is_some(), "editor completion");
    Ok(suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_commented_out_ahead_of_cursor_text() {
        let prompt = completion_prompt("TABLE public.users (\n    id INTEGER\n);", "SELECT * FROM u");
        assert!(prompt.contains("-- TABLE public.users ("));
        assert!(prompt.contains("--     id INTEGER"));
        assert!(prompt.ends_with("\n\nSELECT * FROM u"));
        assert!(
            prompt
                .lines()
                .take_while(|l| !l.is_empty())
                .all(|l| l.starts_with("--"))
        );
    }
}
