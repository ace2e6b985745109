//! Conversational agent that turns speech into drone commands

mod bridge;
mod model;
mod session;

pub use bridge::{AgentBridge, AgentReply, MAX_TOOL_ROUNDS, MODEL_APOLOGY, ROUND_LIMIT_REPLY};
pub use model::{LanguageModel, Message, ModelTurn, ToolCall};
pub use session::{ConversationSession, ExecutedCommand, Turn, persona};
