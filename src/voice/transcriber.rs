//! Realtime speech-to-text over the AssemblyAI websocket
//!
//! Microphone chunks go up as base64 PCM16; partial and final transcripts
//! come back. Only non-empty finals leave this module, through a bounded
//! channel that drops utterances while the dialogue loop is busy.

use std::time::Duration;

use base64::Engine;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::SAMPLE_RATE;
use crate::shutdown::signalled;
use crate::{Error, Result};

/// AssemblyAI realtime endpoint
pub const DEFAULT_REALTIME_URL: &str = "wss://api.assemblyai.com/v2/realtime/ws";

/// Finalized utterances that may wait for the dialogue loop
pub const UTTERANCE_QUEUE_DEPTH: usize = 4;

/// How long to wait for the server to confirm session termination
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether a transcript may still change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// A transcript hypothesis from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
}

impl TranscriptEvent {
    /// Whether this event should become an utterance
    #[must_use]
    pub fn is_utterance(&self) -> bool {
        self.kind == TranscriptKind::Final && !self.text.trim().is_empty()
    }
}

/// A message received on the realtime socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    SessionBegins { session_id: String },
    Transcript(TranscriptEvent),
    SessionTerminated,
    Error(String),
    /// Anything this client does not act on
    Other,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_type: Option<String>,
    #[serde(default)]
    text: String,
    session_id: Option<String>,
    error: Option<String>,
}

/// Parse one text frame from the server
///
/// # Errors
///
/// Returns error if the frame is not JSON
pub fn parse_message(frame: &str) -> Result<ServerMessage> {
    let raw: RawMessage = serde_json::from_str(frame)?;

    if let Some(error) = raw.error {
        return Ok(ServerMessage::Error(error));
    }

    let message = match raw.message_type.as_deref() {
        Some("SessionBegins") => ServerMessage::SessionBegins {
            session_id: raw.session_id.unwrap_or_default(),
        },
        Some("PartialTranscript") => ServerMessage::Transcript(TranscriptEvent {
            kind: TranscriptKind::Partial,
            text: raw.text,
        }),
        Some("FinalTranscript") => ServerMessage::Transcript(TranscriptEvent {
            kind: TranscriptKind::Final,
            text: raw.text,
        }),
        Some("SessionTerminated") => ServerMessage::SessionTerminated,
        _ => ServerMessage::Other,
    };
    Ok(message)
}

/// Hand a finalized utterance to the dialogue loop without waiting
///
/// Returns `false` once the receiver is gone. A full queue drops the
/// utterance with a warning.
pub fn forward_utterance(utterances: &mpsc::Sender<String>, text: &str) -> bool {
    match utterances.try_send(text.trim().to_string()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            tracing::warn!(utterance = %dropped, "dialogue busy, dropping utterance");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn audio_frame(chunk: &[u8]) -> String {
    serde_json::json!({
        "audio_data": base64::engine::general_purpose::STANDARD.encode(chunk)
    })
    .to_string()
}

/// Realtime transcription session factory
pub struct RealtimeTranscriber {
    api_key: SecretString,
    url: String,
}

impl RealtimeTranscriber {
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            url: DEFAULT_REALTIME_URL.to_string(),
        }
    }

    /// Use a different realtime endpoint
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Stream `audio` to the service and forward finalized utterances
    ///
    /// Runs until shutdown is signalled, the audio source ends, the
    /// utterance receiver is dropped, or the server ends the session. The
    /// session is terminated politely on the way out.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails or the server reports an error
    pub async fn run(
        &self,
        mut audio: mpsc::Receiver<Vec<u8>>,
        utterances: mpsc::Sender<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let url = format!("{}?sample_rate={SAMPLE_RATE}", self.url);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transcription(format!("invalid url: {e}")))?;
        let key = HeaderValue::from_str(self.api_key.expose_secret())
            .map_err(|e| Error::Config(format!("invalid AssemblyAI key: {e}")))?;
        request.headers_mut().insert("Authorization", key);

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Transcription(format!("connect failed: {e}")))?;
        let (mut writer, mut reader) = socket.split();

        tracing::info!(url = %self.url, "transcription connected");

        let outcome = loop {
            tokio::select! {
                () = signalled(&mut shutdown) => break Ok(true),
                chunk = audio.recv() => {
                    let Some(chunk) = chunk else {
                        tracing::debug!("audio source ended");
                        break Ok(true);
                    };
                    if let Err(e) = writer.send(Message::Text(audio_frame(&chunk))).await {
                        break Err(Error::Transcription(format!("send failed: {e}")));
                    }
                }
                frame = reader.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => match parse_message(&text) {
                            Ok(ServerMessage::SessionBegins { session_id }) => {
                                tracing::info!(session_id = %session_id, "transcription session started");
                            }
                            Ok(ServerMessage::Transcript(event)) if event.is_utterance() => {
                                tracing::info!(utterance = %event.text, "final transcript");
                                if !forward_utterance(&utterances, &event.text) {
                                    break Ok(true);
                                }
                            }
                            Ok(ServerMessage::Transcript(event)) => {
                                tracing::trace!(text = %event.text, "partial transcript");
                            }
                            Ok(ServerMessage::SessionTerminated) => break Ok(false),
                            Ok(ServerMessage::Error(error)) => break Err(Error::Transcription(error)),
                            Ok(ServerMessage::Other) => {}
                            Err(e) => tracing::warn!(error = %e, "unreadable transcription message"),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            break Err(Error::Transcription("server closed the session".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(Error::Transcription(format!("receive failed: {e}"))),
                    }
                }
            }
        };

        // Ok(true) means the session is still open and should be terminated
        if matches!(outcome, Ok(true)) {
            let terminate = serde_json::json!({ "terminate_session": true }).to_string();
            if writer.send(Message::Text(terminate)).await.is_ok() {
                let confirmed = tokio::time::timeout(TERMINATE_TIMEOUT, async {
                    while let Some(Ok(frame)) = reader.next().await {
                        if let Message::Text(text) = frame
                            && matches!(parse_message(&text), Ok(ServerMessage::SessionTerminated))
                        {
                            return true;
                        }
                    }
                    false
                })
                .await
                .unwrap_or(false);
                tracing::debug!(confirmed, "transcription session terminated");
            }
        }
        let _ = writer.close().await;

        tracing::info!("transcription closed");
        outcome.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_messages() {
        assert_eq!(
            parse_message(r#"{"message_type":"SessionBegins","session_id":"abc","expires_at":"2026-01-01T00:00:00"}"#)
                .unwrap(),
            ServerMessage::SessionBegins {
                session_id: "abc".to_string()
            }
        );
        assert_eq!(
            parse_message(r#"{"message_type":"SessionTerminated"}"#).unwrap(),
            ServerMessage::SessionTerminated
        );
        assert_eq!(
            parse_message(r#"{"error":"Not authorized"}"#).unwrap(),
            ServerMessage::Error("Not authorized".to_string())
        );
        assert!(parse_message("not json").is_err());
    }

    #[test]
    fn only_non_empty_finals_are_utterances() {
        let partial = parse_message(r#"{"message_type":"PartialTranscript","text":"take"}"#).unwrap();
        let empty = parse_message(r#"{"message_type":"FinalTranscript","text":"  "}"#).unwrap();
        let fin = parse_message(r#"{"message_type":"FinalTranscript","text":"Take off."}"#).unwrap();

        let ServerMessage::Transcript(partial) = partial else { panic!() };
        let ServerMessage::Transcript(empty) = empty else { panic!() };
        let ServerMessage::Transcript(fin) = fin else { panic!() };

        assert!(!partial.is_utterance());
        assert!(!empty.is_utterance());
        assert!(fin.is_utterance());
    }

    #[test]
    fn full_queue_drops_newest() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(forward_utterance(&tx, " first "));
        assert!(forward_utterance(&tx, "second"));
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward_utterance(&tx, "third"));
    }

    #[test]
    fn audio_frames_are_base64() {
        let frame: serde_json::Value = serde_json::from_str(&audio_frame(&[1, 2, 3])).unwrap();
        assert_eq!(frame["audio_data"], "AQID");
    }
}
