//! Shared test utilities
//!
//! In-process stand-ins for every external service, plus a harness that
//! wires them into a [`PilotContext`] rooted in a scratch directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use voice_pilot::agent::{LanguageModel, Message, ModelTurn, ToolCall};
use voice_pilot::commands::ToolDeclaration;
use voice_pilot::drone::{DroneLink, SimulatedDrone};
use voice_pilot::safety::{Conditions, WeatherSource};
use voice_pilot::vision::Captioner;
use voice_pilot::voice::{Speaker, Synthesizer};
use voice_pilot::{Collaborators, Config, Error, PilotContext, Result};

/// Ordered record of what the doubles observed
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Language model that maps phrases to function calls
///
/// On a new utterance it logs `heard: <utterance>` and picks a call by
/// keyword; once function results come back it replies with their outputs.
/// Utterances containing "fail" produce a model error.
pub struct KeywordModel {
    log: EventLog,
}

impl KeywordModel {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

fn call(name: &str, args: serde_json::Value) -> ModelTurn {
    ModelTurn::calls(vec![ToolCall {
        name: name.to_string(),
        args,
    }])
}

#[async_trait]
impl LanguageModel for KeywordModel {
    async fn generate(
        &self,
        _system: &str,
        _tools: &[ToolDeclaration],
        history: &[Message],
    ) -> Result<ModelTurn> {
        match history.last() {
            Some(Message::User(utterance)) => {
                self.log.lock().unwrap().push(format!("heard: {utterance}"));
                let lowered = utterance.to_lowercase();
                if lowered.contains("fail") {
                    Err(Error::Agent("model unavailable".to_string()))
                } else if lowered.contains("take off") {
                    Ok(call("takeoff_land", json!({ "takeoff": true })))
                } else if lowered.contains("land") {
                    Ok(call("takeoff_land", json!({ "land": true })))
                } else if lowered.contains("what do you see") {
                    Ok(call("what_do_you_see", json!({ "read_camera_feed": true })))
                } else if lowered.contains("weather") {
                    Ok(call("check_weather", json!({})))
                } else if lowered.contains("forward") {
                    Ok(call("move_forward", json!({})))
                } else {
                    Ok(ModelTurn::text(format!("You said {utterance}.")))
                }
            }
            Some(Message::ToolResult { .. }) => {
                let outputs: Vec<&str> = history
                    .iter()
                    .rev()
                    .map_while(|m| match m {
                        Message::ToolResult { output, .. } => Some(output.as_str()),
                        _ => None,
                    })
                    .collect();
                let reply: Vec<&str> = outputs.into_iter().rev().collect();
                Ok(ModelTurn::text(reply.join(" ")))
            }
            _ => Ok(ModelTurn::text("Hello.")),
        }
    }
}

/// Captioner that always fails
pub struct FailingCaptioner;

#[async_trait]
impl Captioner for FailingCaptioner {
    async fn caption(&self, _jpeg: &[u8], _instruction: &str) -> Result<String> {
        Err(Error::Vision("captioning offline".to_string()))
    }
}

/// Weather source returning the same conditions every time
pub struct FixedWeather(pub Conditions);

#[async_trait]
impl WeatherSource for FixedWeather {
    async fn current(&self) -> Result<Conditions> {
        Ok(self.0.clone())
    }
}

/// Calm, clear conditions
pub fn calm() -> Conditions {
    Conditions {
        description: "clear sky".to_string(),
        condition_code: 800,
        temperature: 18.0,
        wind_speed: 1.5,
    }
}

/// Synthesizer whose "audio" is the UTF-8 text
pub struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

/// Speaker that logs `spoke: <text>` for each clip
pub struct RecordingSpeaker {
    log: EventLog,
}

impl RecordingSpeaker {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(audio);
        self.log.lock().unwrap().push(format!("spoke: {text}"));
        Ok(())
    }
}

/// A fully wired pilot backed by doubles
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub drone: Arc<SimulatedDrone>,
    pub log: EventLog,
    pub context: PilotContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_weather(calm())
    }

    pub fn with_weather(conditions: Conditions) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let work_dir = dir.path().join("work");
        let vars = HashMap::from([(
            "PILOT_WORK_DIR".to_string(),
            work_dir.display().to_string(),
        )]);
        let config = Config::from_lookup(|key| vars.get(key).cloned()).expect("config");

        let drone = Arc::new(SimulatedDrone::new());
        let log = EventLog::default();
        let collaborators = Collaborators {
            link: Arc::clone(&drone) as Arc<dyn DroneLink>,
            model: Arc::new(KeywordModel::new(Arc::clone(&log))),
            captioner: Arc::new(FailingCaptioner),
            weather: Arc::new(FixedWeather(conditions)),
            synthesizer: Arc::new(EchoSynthesizer),
            speaker: Arc::new(RecordingSpeaker::new(Arc::clone(&log))),
        };
        let context = PilotContext::assemble(config, collaborators).expect("assemble");

        Self {
            dir,
            drone,
            log,
            context,
        }
    }

    /// Everything logged so far
    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}
