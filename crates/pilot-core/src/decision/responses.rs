//! Low-level client for the decision service's Responses API.

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::config::DecisionConfig;
use crate::error::{AgentError, AgentResult, ErrorKind};

const RESPONSES_PATH: &str = "/responses";
const USER_AGENT: &str = concat!("pilot/", env!("CARGO_PKG_VERSION"));

/// One parsed Responses API reply: the response id plus its raw output
/// items, left as JSON for the deciders to interpret.
#[derive(Debug, Clone)]
pub struct ResponsesOutput {
    pub id: String,
    pub output: Vec<Value>,
}

/// HTTP client bound to one decision service endpoint.
#[derive(Clone)]
pub struct ResponsesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ResponsesClient {
    pub fn new(config: &DecisionConfig) -> AgentResult<Self> {
        let api_key = config.resolve_api_key().map_err(|e| {
            AgentError::new(ErrorKind::Decision, e.to_string())
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Posts one request body and parses the reply.
    ///
    /// A reply without an `output` array is a malformed-response error
    /// carrying the raw body for diagnosis.
    pub async fn create(&self, body: Value) -> AgentResult<ResponsesOutput> {
        let url = format!("{}{RESPONSES_PATH}", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(build_headers(&self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AgentError::with_details(
                    ErrorKind::Decision,
                    "Decision service request failed",
                    e.to_string(),
                )
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AgentError::with_details(
                ErrorKind::Decision,
                "Failed to read decision service response",
                e.to_string(),
            )
        })?;
        if !status.is_success() {
            return Err(AgentError::with_details(
                ErrorKind::Decision,
                format!("Decision service returned {status}"),
                text,
            ));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|_| {
            AgentError::malformed_response("AI model returned an unexpected response format.", &text)
        })?;
        parse_output(&parsed, &text)
    }
}

fn parse_output(parsed: &Value, raw: &str) -> AgentResult<ResponsesOutput> {
    let Some(output) = parsed.get("output").and_then(Value::as_array) else {
        return Err(AgentError::malformed_response(
            "AI model returned an unexpected response format.",
            raw,
        ));
    };
    let id = parsed
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ResponsesOutput {
        id,
        output: output.clone(),
    })
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("accept", HeaderValue::from_static("application/json"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

/// Extracts the text of the first `message` item, the narration channel
/// of every decision shape. Non-text content is stringified rather than
/// dropped.
pub fn first_message_text(output: &[Value]) -> Option<String> {
    let content = output
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("message"))?
        .get("content")?;
    let parts = content.as_array()?;
    let first = parts.first()?;
    if first.get("type").and_then(Value::as_str) == Some("output_text") {
        first.get("text").and_then(Value::as_str).map(str::to_string)
    } else {
        Some(content.to_string())
    }
}

/// Filters output items of the given type.
pub fn items_of_type<'a>(output: &'a [Value], kind: &str) -> Vec<&'a Value> {
    output
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some(kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_message_text_reads_output_text() {
        let output = vec![
            json!({"type": "reasoning", "summary": []}),
            json!({
                "type": "message",
                "content": [{"type": "output_text", "text": "I see the home screen."}]
            }),
        ];
        assert_eq!(
            first_message_text(&output).as_deref(),
            Some("I see the home screen.")
        );
    }

    #[test]
    fn first_message_text_stringifies_unknown_content() {
        let output = vec![json!({
            "type": "message",
            "content": [{"type": "refusal", "refusal": "no"}]
        })];
        let text = first_message_text(&output).unwrap();
        assert!(text.contains("refusal"));
    }

    #[test]
    fn missing_output_array_is_malformed() {
        let raw = r#"{"id": "resp_1", "object": "response"}"#;
        let parsed: Value = serde_json::from_str(raw).unwrap();
        let err = parse_output(&parsed, raw).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::MalformedResponse);
        assert!(err.details.as_deref().unwrap_or_default().contains("resp_1"));
    }

    #[test]
    fn items_of_type_filters_calls() {
        let output = vec![
            json!({"type": "message", "content": []}),
            json!({"type": "function_call", "name": "tap"}),
            json!({"type": "function_call", "name": "stop"}),
        ];
        assert_eq!(items_of_type(&output, "function_call").len(), 2);
        assert_eq!(items_of_type(&output, "computer_call").len(), 0);
    }
}
