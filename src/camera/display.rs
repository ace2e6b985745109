//! Live camera viewer over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::FrameStore;
use crate::drone::{ActuatorController, FlightState};
use crate::shutdown::signalled;
use crate::{Error, Result};

const VIEWER_HTML: &str = r#"<!doctype html>
<html>
<head><title>Drone Camera Feed</title></head>
<body style="margin:0;background:#111;color:#ddd;font-family:sans-serif">
<img id="feed" src="/frame.jpg" width="700" height="500" alt="waiting for first frame">
<p id="status"></p>
<script>
setInterval(async () => {
  document.getElementById("feed").src = "/frame.jpg?t=" + Date.now();
  try {
    const s = await (await fetch("/status")).json();
    document.getElementById("status").textContent =
      s.flight_state + (s.frame_sequence ? " | frame " + s.frame_sequence : "");
  } catch (_) {}
}, 1000);
</script>
</body>
</html>
"#;

/// Shared state for the viewer routes
#[derive(Clone)]
pub struct DisplayState {
    /// Frames to serve
    pub frames: Arc<FrameStore>,
    /// Flight state source for `/status`
    pub controller: Arc<ActuatorController>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    flight_state: FlightState,
    frame_sequence: Option<u64>,
    frame_captured_at: Option<String>,
}

/// Build the viewer router
pub fn display_router(state: DisplayState) -> Router {
    Router::new()
        .route("/", get(viewer))
        .route("/frame.jpg", get(latest_frame))
        .route("/status", get(status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn viewer() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

async fn latest_frame(State(state): State<DisplayState>) -> Response {
    match state.frames.latest() {
        Ok(frame) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            frame.jpeg.clone(),
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "no frame yet").into_response(),
    }
}

async fn status(State(state): State<DisplayState>) -> Json<StatusResponse> {
    let frame = state.frames.latest().ok();
    Json(StatusResponse {
        flight_state: state.controller.observed_state(),
        frame_sequence: frame.as_ref().map(|f| f.sequence),
        frame_captured_at: frame.map(|f| f.captured_at.to_rfc3339()),
    })
}

/// Serve the viewer on `addr` until shutdown
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve_display(
    addr: SocketAddr,
    state: DisplayState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind display server: {e}")))?;

    tracing::info!(url = %format!("http://{addr}/"), "camera viewer listening");

    axum::serve(listener, display_router(state))
        .with_graceful_shutdown(async move { signalled(&mut shutdown).await })
        .await?;

    tracing::info!("camera viewer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::camera::Frame;
    use crate::drone::{DroneLink, SimulatedDrone};

    fn state() -> (tempfile::TempDir, DisplayState) {
        let dir = tempfile::tempdir().unwrap();
        let frames = Arc::new(FrameStore::new(dir.path().join("snapshot.jpg")));
        let controller = Arc::new(ActuatorController::new(
            Arc::new(SimulatedDrone::new()) as Arc<dyn DroneLink>
        ));
        (dir, DisplayState { frames, controller })
    }

    #[tokio::test]
    async fn frame_route_is_404_before_first_frame() {
        let (_dir, state) = state();
        let response = display_router(state)
            .oneshot(Request::get("/frame.jpg").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn frame_route_serves_latest_jpeg() {
        let (_dir, state) = state();
        state.frames.publish(Frame::new(vec![0xFF, 0xD8, 0xFF])).unwrap();

        let response = display_router(state)
            .oneshot(Request::get("/frame.jpg").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), &[0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn status_route_reports_flight_state() {
        let (_dir, state) = state();
        let response = display_router(state)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["flight_state"], "grounded");
        assert!(json["frame_sequence"].is_null());
    }
}
