//! Language model boundary

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::commands::ToolDeclaration;

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    /// Arguments object as the model produced it
    pub args: serde_json::Value,
}

/// One entry of the model-facing history
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Operator utterance
    User(String),
    /// Model output: text, function calls, or both
    Model {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Result of executing one function call
    ToolResult { name: String, output: String },
}

/// What the model returned for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    /// A text-only turn
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// A turn requesting function calls
    #[must_use]
    pub const fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }
}

/// Conversational model with function calling
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Continue the conversation in `history`
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be reached or its reply is unusable
    async fn generate(
        &self,
        system: &str,
        tools: &[ToolDeclaration],
        history: &[Message],
    ) -> Result<ModelTurn>;
}
