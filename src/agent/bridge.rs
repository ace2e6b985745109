//! Utterance to command resolution

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::{
    ConversationSession, ExecutedCommand, LanguageModel, Message, ModelTurn, ToolCall, Turn,
};
use crate::commands::{CommandExecutor, CommandRegistry, ToolDeclaration};

/// Maximum model round trips per utterance
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Spoken when the language model fails
pub const MODEL_APOLOGY: &str = "Sorry, I'm having trouble thinking right now.";

/// Spoken when the model keeps calling functions past the round limit
pub const ROUND_LIMIT_REPLY: &str = "Sorry, that request took too many steps, so I stopped.";

/// Reply text plus every call made while producing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReply {
    pub text: String,
    pub executed: Vec<ExecutedCommand>,
}

/// Resolves utterances into commands through the language model
///
/// Owns the conversation. `handle` takes `&mut self`, so only one utterance
/// is ever in flight.
pub struct AgentBridge {
    model: Arc<dyn LanguageModel>,
    registry: CommandRegistry,
    tools: Vec<ToolDeclaration>,
    executor: CommandExecutor,
    session: ConversationSession,
}

impl AgentBridge {
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: CommandRegistry,
        executor: CommandExecutor,
        session: ConversationSession,
    ) -> Self {
        let tools = registry.declarations();
        Self {
            model,
            registry,
            tools,
            executor,
            session,
        }
    }

    /// Conversation so far
    #[must_use]
    pub const fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// Resolve one finalized utterance
    ///
    /// Function calls run sequentially in the order the model returns them.
    /// Invalid calls and drone failures are fed back to the model as
    /// `Error: ...` results; a model failure ends the turn with
    /// [`MODEL_APOLOGY`]. Never fails.
    pub async fn handle(&mut self, utterance: &str) -> AgentReply {
        let session_id = self.session.id();
        tracing::info!(session = %session_id, utterance, "handling utterance");

        self.session.push_message(Message::User(utterance.to_string()));

        let mut executed = Vec::new();
        let mut reply = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let turn = match self
                .model
                .generate(
                    self.session.system_instruction(),
                    &self.tools,
                    self.session.history(),
                )
                .await
            {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::warn!(session = %session_id, round, error = %e, "language model failed");
                    self.session.push_message(Message::Model {
                        text: MODEL_APOLOGY.to_string(),
                        tool_calls: Vec::new(),
                    });
                    reply = Some(MODEL_APOLOGY.to_string());
                    break;
                }
            };

            let ModelTurn { text, tool_calls } = turn;
            self.session.push_message(Message::Model {
                text: text.clone(),
                tool_calls: tool_calls.clone(),
            });

            if tool_calls.is_empty() {
                reply = Some(text);
                break;
            }

            tracing::debug!(round, calls = tool_calls.len(), "model requested function calls");
            for call in tool_calls {
                let done = self.execute(call).await;
                let output = match &done.outcome {
                    Ok(output) => output.clone(),
                    Err(error) => format!("Error: {error}"),
                };
                self.session.push_message(Message::ToolResult {
                    name: done.name.clone(),
                    output,
                });
                executed.push(done);
            }
        }

        let text = match reply {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            Some(_) => summarize(&executed),
            None => {
                tracing::warn!(session = %session_id, "tool round limit reached");
                ROUND_LIMIT_REPLY.to_string()
            }
        };

        tracing::info!(
            session = %session_id,
            reply = %text,
            commands = executed.len(),
            "utterance handled"
        );

        self.session.record_turn(Turn {
            utterance: utterance.to_string(),
            reply: text.clone(),
            executed: executed.clone(),
            at: Utc::now(),
        });

        AgentReply { text, executed }
    }

    async fn execute(&self, call: ToolCall) -> ExecutedCommand {
        let outcome = match self.registry.resolve(&call.name, &call.args) {
            Ok(commands) => self.executor.run_all(&commands).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::warn!(command = %call.name, error = %e, "command failed");
        }

        ExecutedCommand {
            name: call.name,
            arguments: call.args,
            outcome: outcome.map_err(|e| e.to_string()),
        }
    }
}

/// Reply built from call outcomes when the model gives no text
fn summarize(executed: &[ExecutedCommand]) -> String {
    if executed.is_empty() {
        return "Okay.".to_string();
    }
    executed
        .iter()
        .map(|e| match &e.outcome {
            Ok(output) => output.clone(),
            Err(error) => format!("That didn't work: {error}."),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::camera::FrameStore;
    use crate::commands::default_registry;
    use crate::drone::{ActuatorController, DroneLink, FlightState, SimulatedDrone};
    use crate::safety::{Conditions, SafetyGate, WeatherSource};
    use crate::vision::{Captioner, VisionQuery};
    use crate::{Error, Result};

    /// Replays canned turns and records the history it was shown
    struct Scripted {
        turns: Mutex<VecDeque<Result<ModelTurn>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(turns: Vec<Result<ModelTurn>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn generate(
            &self,
            _system: &str,
            _tools: &[ToolDeclaration],
            history: &[Message],
        ) -> Result<ModelTurn> {
            self.seen.lock().unwrap().push(history.to_vec());
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelTurn::calls(vec![call("query_status", json!({}))])))
        }
    }

    struct Calm;

    #[async_trait]
    impl WeatherSource for Calm {
        async fn current(&self) -> Result<Conditions> {
            Ok(Conditions {
                description: "clear sky".to_string(),
                condition_code: 800,
                temperature: 20.0,
                wind_speed: 1.0,
            })
        }
    }

    struct Blind;

    #[async_trait]
    impl Captioner for Blind {
        async fn caption(&self, _jpeg: &[u8], _instruction: &str) -> Result<String> {
            Err(Error::Vision("offline".to_string()))
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args,
        }
    }

    fn bridge(
        model: Arc<Scripted>,
    ) -> (tempfile::TempDir, Arc<ActuatorController>, AgentBridge) {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(ActuatorController::new(
            Arc::new(SimulatedDrone::new()) as Arc<dyn DroneLink>
        ));
        let frames = Arc::new(FrameStore::new(dir.path().join("snapshot.jpg")));
        let executor = CommandExecutor::new(
            Arc::clone(&controller),
            Arc::new(SafetyGate::new(Arc::new(Calm))),
            Arc::new(VisionQuery::new(frames, Arc::new(Blind))),
        );
        let bridge = AgentBridge::new(
            model,
            default_registry(20.0).unwrap(),
            executor,
            ConversationSession::new("test persona"),
        );
        (dir, controller, bridge)
    }

    #[tokio::test]
    async fn executes_call_and_returns_final_text() {
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::calls(vec![call("takeoff_land", json!({"takeoff": true}))])),
            Ok(ModelTurn::text("I'm up!")),
        ]));
        let (_dir, controller, mut bridge) = bridge(Arc::clone(&model));

        let reply = bridge.handle("take off").await;

        assert_eq!(reply.text, "I'm up!");
        assert_eq!(reply.executed.len(), 1);
        assert_eq!(reply.executed[0].outcome.as_deref(), Ok("Took off."));
        assert_eq!(controller.flight_state().await, FlightState::Airborne);

        // Second request saw the function result
        let seen = model.seen.lock().unwrap();
        assert_eq!(
            seen[1].last(),
            Some(&Message::ToolResult {
                name: "takeoff_land".to_string(),
                output: "Took off.".to_string()
            })
        );
    }

    #[tokio::test]
    async fn rejected_command_is_reported_to_model() {
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::calls(vec![call("flip", json!({"left": true}))])),
            Ok(ModelTurn::text("I need to take off first.")),
        ]));
        let (_dir, controller, mut bridge) = bridge(Arc::clone(&model));

        let reply = bridge.handle("do a flip").await;

        assert_eq!(reply.text, "I need to take off first.");
        assert!(!reply.executed[0].succeeded());
        assert_eq!(controller.flight_state().await, FlightState::Grounded);

        let seen = model.seen.lock().unwrap();
        let Some(Message::ToolResult { output, .. }) = seen[1].last() else {
            panic!("expected a tool result");
        };
        assert!(output.starts_with("Error: cannot flip left while grounded"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_drone() {
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::calls(vec![call("move_forward", json!({"distance": -5}))])),
            Ok(ModelTurn::text("I can't do that.")),
        ]));
        let (_dir, _controller, mut bridge) = bridge(model);

        let reply = bridge.handle("go backwards forward").await;
        let error = reply.executed[0].outcome.as_ref().unwrap_err();
        assert!(error.contains("must be positive"));
    }

    #[tokio::test]
    async fn model_failure_apologizes_and_records_turn() {
        let model = Arc::new(Scripted::new(vec![
            Err(Error::Agent("503".to_string())),
            Ok(ModelTurn::text("Hello again.")),
        ]));
        let (_dir, _controller, mut bridge) = bridge(model);

        assert_eq!(bridge.handle("hello").await.text, MODEL_APOLOGY);
        assert_eq!(bridge.handle("hello?").await.text, "Hello again.");

        let turns = bridge.session().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].reply, MODEL_APOLOGY);
    }

    #[tokio::test]
    async fn round_limit_stops_runaway_calls() {
        // Empty script: the model keeps asking for status forever
        let model = Arc::new(Scripted::new(Vec::new()));
        let (_dir, _controller, mut bridge) = bridge(Arc::clone(&model));

        let reply = bridge.handle("status").await;

        assert_eq!(reply.text, ROUND_LIMIT_REPLY);
        assert_eq!(reply.executed.len(), MAX_TOOL_ROUNDS);
        assert_eq!(model.seen.lock().unwrap().len(), MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn empty_text_falls_back_to_outcomes() {
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::calls(vec![call("takeoff_land", json!({"takeoff": true}))])),
            Ok(ModelTurn::text("  ")),
        ]));
        let (_dir, _controller, mut bridge) = bridge(model);

        assert_eq!(bridge.handle("up").await.text, "Took off.");
    }

    #[tokio::test]
    async fn turns_keep_arrival_order() {
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::text("one")),
            Ok(ModelTurn::text("two")),
            Ok(ModelTurn::text("three")),
        ]));
        let (_dir, _controller, mut bridge) = bridge(model);

        for utterance in ["first", "second", "third"] {
            bridge.handle(utterance).await;
        }

        let utterances: Vec<_> = bridge
            .session()
            .turns()
            .iter()
            .map(|t| t.utterance.as_str())
            .collect();
        assert_eq!(utterances, vec!["first", "second", "third"]);
    }
}
