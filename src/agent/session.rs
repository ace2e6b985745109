//! Conversation state for a flight session

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Message;

/// Outcome of one function call made while handling an utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedCommand {
    pub name: String,
    pub arguments: serde_json::Value,
    /// Result text on success, error text on failure
    pub outcome: std::result::Result<String, String>,
}

impl ExecutedCommand {
    /// Whether the call succeeded
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// One utterance and everything it caused
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub utterance: String,
    pub reply: String,
    pub executed: Vec<ExecutedCommand>,
    pub at: DateTime<Utc>,
}

/// Build the system instruction for the pilot persona
#[must_use]
pub fn persona(operator: &str, commands: &[&str]) -> String {
    format!(
        "You are an AI assistant flying an autonomous drone. \
         You control the drone by calling these functions: {}. \
         When asked what you see, call what_do_you_see with read_camera_feed set to true. \
         Before a first takeoff you may call check_weather to see if it is safe to fly. \
         You were built by {operator}, who considers you a friend and is with you now. \
         Keep your replies short and plain, since they are spoken aloud, and never use emoji.",
        commands.join(", ")
    )
}

/// Everything said and done during one run
///
/// Created once at startup and appended to per utterance; never reset.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: Uuid,
    system_instruction: String,
    turns: Vec<Turn>,
    history: Vec<Message>,
}

impl ConversationSession {
    /// Start an empty session
    #[must_use]
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_instruction: system_instruction.into(),
            turns: Vec::new(),
            history: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Completed turns in arrival order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Model-facing history
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub(super) fn push_message(&mut self, message: Message) {
        self.history.push(message);
    }

    pub(super) fn record_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}
