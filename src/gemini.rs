//! Gemini `generateContent` client
//!
//! One client type serves both the conversational model (with function
//! declarations) and the image captioner; they usually run with different
//! model names.

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::agent::{LanguageModel, Message, ModelTurn, ToolCall};
use crate::commands::ToolDeclaration;
use crate::vision::Captioner;
use crate::{Error, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model for conversation and captioning
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini API client bound to one model
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tools<'a>>,
}

#[derive(Debug, Serialize)]
struct Tools<'a> {
    function_declarations: Vec<FunctionDeclaration<'a>>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(
        default,
        alias = "inlineData",
        skip_serializing_if = "Option::is_none"
    )]
    inline_data: Option<InlineData>,
    #[serde(
        default,
        alias = "functionCall",
        skip_serializing_if = "Option::is_none"
    )]
    function_call: Option<FunctionCall>,
    #[serde(
        default,
        alias = "functionResponse",
        skip_serializing_if = "Option::is_none"
    )]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InlineData {
    #[serde(alias = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default, alias = "finishReason")]
    finish_reason: Option<String>,
}

impl GeminiClient {
    /// Create a client for `model`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Google API key required for Gemini".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(&self, request: &GenerateRequest<'_>) -> Result<Content> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("API error {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("parse error: {e}")))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Agent("response has no candidates".to_string()))?;

        candidate.content.ok_or_else(|| {
            Error::Agent(format!(
                "candidate has no content (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ))
        })
    }
}

/// Convert history into Gemini contents
///
/// Consecutive function results are grouped into one content, matching the
/// calls of the preceding model turn.
fn contents(history: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::with_capacity(history.len());

    for message in history {
        match message {
            Message::User(text) => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }),
            Message::Model { text, tool_calls } => {
                let mut parts = Vec::with_capacity(tool_calls.len() + 1);
                if !text.is_empty() {
                    parts.push(Part::text(text));
                }
                parts.extend(tool_calls.iter().map(|call| Part {
                    function_call: Some(FunctionCall {
                        name: call.name.clone(),
                        args: call.args.clone(),
                    }),
                    ..Part::default()
                }));
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            Message::ToolResult { name, output } => {
                let part = Part {
                    function_response: Some(FunctionResponse {
                        name: name.clone(),
                        response: serde_json::json!({ "result": output }),
                    }),
                    ..Part::default()
                };
                match contents.last_mut() {
                    Some(last) if last.role.as_deref() == Some("function") => last.parts.push(part),
                    _ => contents.push(Content {
                        role: Some("function".to_string()),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    contents
}

/// Gemini schemas spell types in upper case
fn upper_case_types(mut schema: serde_json::Value) -> serde_json::Value {
    if let Some(map) = schema.as_object_mut() {
        for (key, value) in map.iter_mut() {
            if key == "type" {
                if let Some(kind) = value.as_str() {
                    *value = serde_json::Value::String(kind.to_uppercase());
                }
            } else {
                *value = upper_case_types(value.take());
            }
        }
    }
    schema
}

fn model_turn(content: Content) -> ModelTurn {
    let mut turn = ModelTurn::default();
    for part in content.parts {
        if let Some(text) = part.text {
            turn.text.push_str(&text);
        }
        if let Some(call) = part.function_call {
            turn.tool_calls.push(ToolCall {
                name: call.name,
                args: call.args,
            });
        }
    }
    turn
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(
        &self,
        system: &str,
        tools: &[ToolDeclaration],
        history: &[Message],
    ) -> Result<ModelTurn> {
        let declarations: Vec<FunctionDeclaration<'_>> = tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: &tool.name,
                description: &tool.description,
                parameters: tool.parameters.clone().map(upper_case_types),
            })
            .collect();

        let request = GenerateRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part::text(system)],
            }),
            contents: contents(history),
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![Tools {
                    function_declarations: declarations,
                }]
            },
        };

        let content = self.generate_content(&request).await?;
        let turn = model_turn(content);
        tracing::debug!(
            model = %self.model,
            calls = turn.tool_calls.len(),
            text_len = turn.text.len(),
            "gemini turn"
        );
        Ok(turn)
    }
}

#[async_trait]
impl Captioner for GeminiClient {
    async fn caption(&self, jpeg: &[u8], instruction: &str) -> Result<String> {
        let data = base64::engine::general_purpose::STANDARD.encode(jpeg);

        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data,
                        }),
                        ..Part::default()
                    },
                    Part::text(instruction),
                ],
            }],
            tools: Vec::new(),
        };

        let content = self
            .generate_content(&request)
            .await
            .map_err(|e| Error::Vision(e.to_string()))?;

        let text = model_turn(content).text;
        if text.trim().is_empty() {
            return Err(Error::Vision("empty caption".to_string()));
        }
        Ok(text)
    }
}
