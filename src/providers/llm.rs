//! Chat completions against an `OpenAI`-compatible endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Completer;
use crate::conversation::ChatMessage;
use crate::error::CompletionError;
use crate::{Error, Result};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Completion adapter for Groq, `OpenAI` and other compatible services
pub struct ChatCompletions {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletions {
    /// Create a completion client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for completions".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Completer for ChatCompletions {
    async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, CompletionError> {
        tracing::debug!(model = %self.model, messages = messages.len(), "requesting completion");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "completion request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "completion API error");
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(CompletionError::Quota(body));
            }
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        parse_reply(&body)
    }
}

/// Pull the first choice's text out of a completion body
fn parse_reply(body: &str) -> std::result::Result<String, CompletionError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| CompletionError::MalformedResponse("no reply content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" Hey there. "}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "Hey there.");
    }

    #[test]
    fn empty_choices_is_malformed() {
        assert!(matches!(
            parse_reply(r#"{"choices":[]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(parse_reply("<html>"), Err(CompletionError::MalformedResponse(_))));
    }

    #[test]
    fn request_serializes_history_verbatim() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let json = serde_json::to_value(CompletionRequest {
            model: "openai/gpt-oss-20b",
            messages: &messages,
        })
        .unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = ChatCompletions::new(
            "https://api.groq.com/openai/v1/".to_string(),
            "k".to_string(),
            "m".to_string(),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "https://api.groq.com/openai/v1/chat/completions");
    }
}
