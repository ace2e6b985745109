//! Realtime transcription against a local websocket server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use voice_pilot::voice::RealtimeTranscriber;

/// What the fake server saw from the client
#[derive(Debug, Default)]
struct Seen {
    authorization: Option<String>,
    query: Option<String>,
    audio: Vec<String>,
    terminated: bool,
}

/// Accept one session: wait for audio, send transcripts, then confirm
/// termination when asked
async fn serve_once(listener: TcpListener, seen: Arc<Mutex<Seen>>) {
    let (stream, _) = listener.accept().await.unwrap();

    let handshake_seen = Arc::clone(&seen);
    let record = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let mut seen = handshake_seen.lock().unwrap();
        seen.authorization = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        seen.query = req.uri().query().map(ToString::to_string);
        Ok(resp)
    };
    let mut socket = tokio_tungstenite::accept_hdr_async(stream, record)
        .await
        .unwrap();

    let begins = r#"{"message_type":"SessionBegins","session_id":"test-session"}"#;
    socket.send(Message::Text(begins.to_string())).await.unwrap();

    let mut transcripts_sent = false;
    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(text) = message else { continue };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        if let Some(audio) = value["audio_data"].as_str() {
            seen.lock().unwrap().audio.push(audio.to_string());
            if !transcripts_sent {
                transcripts_sent = true;
                for frame in [
                    r#"{"message_type":"PartialTranscript","text":"take"}"#,
                    r#"{"message_type":"FinalTranscript","text":"  "}"#,
                    r#"{"message_type":"FinalTranscript","text":"Take off."}"#,
                ] {
                    socket.send(Message::Text(frame.to_string())).await.unwrap();
                }
            }
        } else if value["terminate_session"] == true {
            seen.lock().unwrap().terminated = true;
            let done = r#"{"message_type":"SessionTerminated"}"#;
            socket.send(Message::Text(done.to_string())).await.unwrap();
            break;
        }
    }
}

#[tokio::test]
async fn test_final_transcripts_become_utterances() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Seen::default()));
    let server = tokio::spawn(serve_once(listener, Arc::clone(&seen)));

    let transcriber = RealtimeTranscriber::new(SecretString::from("test-key".to_string()))
        .with_url(format!("ws://{addr}/v2/realtime/ws"));

    let (audio_tx, audio_rx) = mpsc::channel(8);
    let (utterance_tx, mut utterance_rx) = mpsc::channel(4);
    let (signal, shutdown) = watch::channel(false);

    audio_tx.send(vec![1, 2, 3, 4]).await.unwrap();

    let client = tokio::spawn(async move { transcriber.run(audio_rx, utterance_tx, shutdown).await });

    let utterance = tokio::time::timeout(Duration::from_secs(5), utterance_rx.recv())
        .await
        .expect("no utterance within 5s");
    assert_eq!(utterance.as_deref(), Some("Take off."));

    signal.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .expect("transcriber did not stop")
        .unwrap();
    assert!(result.is_ok(), "{result:?}");
    server.await.unwrap();

    // Partials and blank finals never reach the dialogue
    assert!(utterance_rx.try_recv().is_err());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.authorization.as_deref(), Some("test-key"));
    assert_eq!(seen.query.as_deref(), Some("sample_rate=16000"));
    assert_eq!(seen.audio.first().map(String::as_str), Some("AQIDBA=="));
    assert!(seen.terminated);
}

#[tokio::test]
async fn test_server_error_ends_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let error = r#"{"error":"Not authorized"}"#;
        socket.send(Message::Text(error.to_string())).await.unwrap();
        // Hold the socket open until the client goes away
        while let Some(Ok(_)) = socket.next().await {}
    });

    let transcriber = RealtimeTranscriber::new(SecretString::from("bad-key".to_string()))
        .with_url(format!("ws://{addr}/v2/realtime/ws"));
    let (_audio_tx, audio_rx) = mpsc::channel(8);
    let (utterance_tx, _utterance_rx) = mpsc::channel(4);
    let (_signal, shutdown) = watch::channel(false);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        transcriber.run(audio_rx, utterance_tx, shutdown),
    )
    .await
    .expect("transcriber did not stop");

    let error = result.unwrap_err();
    assert!(error.to_string().contains("Not authorized"), "{error}");
    server.await.unwrap();
}
