//! Flight-state machine over a drone link

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};

use super::{Direction, DroneCommand, DroneLink, FlightState, FlipDirection, Rotation};
use crate::{Error, Result};

/// Smallest translation the Tello SDK accepts (cm)
pub const MIN_MOVE_CM: u32 = 20;

/// Largest translation the Tello SDK accepts (cm)
pub const MAX_MOVE_CM: u32 = 500;

/// Smallest rotation the Tello SDK accepts (degrees)
pub const MIN_ROTATE_DEG: u32 = 1;

/// Largest rotation the Tello SDK accepts (degrees)
pub const MAX_ROTATE_DEG: u32 = 360;

/// Snapshot of drone state reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DroneStatus {
    /// Current flight state
    pub flight_state: FlightState,
    /// Battery percentage, if the drone answered
    pub battery_percent: Option<u8>,
}

impl std::fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.battery_percent {
            Some(battery) => write!(f, "{}, battery at {battery}%", self.flight_state),
            None => write!(f, "{}, battery unknown", self.flight_state),
        }
    }
}

/// Typed wrapper over the drone's physical primitives
///
/// Owns the [`FlightState`]. The state lock is held for the whole round trip
/// of each command, so commands are serialized and state only changes after
/// the drone confirms a takeoff or landing. Confirmed transitions are also
/// mirrored into a watch channel for readers that must not wait on a command.
///
/// A takeoff that went out without a confirmed answer (cancelled, timed out,
/// or rejected) leaves the drone possibly flying, so landing stays allowed
/// until a landing is confirmed.
pub struct ActuatorController {
    link: Arc<dyn DroneLink>,
    state: Mutex<FlightState>,
    observed: watch::Sender<FlightState>,
    takeoff_unconfirmed: AtomicBool,
}

impl ActuatorController {
    /// Create a controller in the grounded state
    #[must_use]
    pub fn new(link: Arc<dyn DroneLink>) -> Self {
        let (observed, _) = watch::channel(FlightState::Grounded);
        Self {
            link,
            state: Mutex::new(FlightState::Grounded),
            observed,
            takeoff_unconfirmed: AtomicBool::new(false),
        }
    }

    /// Current flight state, waiting for any command in progress
    pub async fn flight_state(&self) -> FlightState {
        *self.state.lock().await
    }

    /// Last confirmed flight state, without waiting
    #[must_use]
    pub fn observed_state(&self) -> FlightState {
        *self.observed.borrow()
    }

    /// Whether a takeoff was sent without the drone confirming it
    #[must_use]
    pub fn takeoff_unconfirmed(&self) -> bool {
        self.takeoff_unconfirmed.load(Ordering::SeqCst)
    }

    /// Whether the drone may be off the ground
    fn may_be_flying(&self, state: FlightState) -> bool {
        state == FlightState::Airborne || self.takeoff_unconfirmed()
    }

    /// Enter SDK mode and (re)start the video stream
    ///
    /// # Errors
    ///
    /// Returns error if the drone does not accept SDK mode or the stream
    pub async fn connect(&self) -> Result<DroneStatus> {
        let guard = self.state.lock().await;

        self.link.send(DroneCommand::Connect).await?;

        // The stream must be cycled before frames start flowing
        if let Err(e) = self.link.send(DroneCommand::StreamOff).await {
            tracing::debug!(error = %e, "streamoff before streamon failed");
        }
        self.link.send(DroneCommand::StreamOn).await?;
        drop(guard);

        let status = self.status().await;
        tracing::info!(battery = ?status.battery_percent, "drone connected");
        Ok(status)
    }

    /// Take off
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightState`] when already airborne, or the link error
    /// if the drone rejects the command
    pub async fn takeoff(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == FlightState::Airborne {
            return Err(Error::FlightState {
                command: "take off".to_string(),
                state: *state,
            });
        }

        // Cleared only once the drone confirms
        self.takeoff_unconfirmed.store(true, Ordering::SeqCst);
        if let Err(e) = self.link.send(DroneCommand::Takeoff).await {
            tracing::warn!(error = %e, "takeoff not confirmed");
            return Err(e);
        }
        self.takeoff_unconfirmed.store(false, Ordering::SeqCst);
        *state = FlightState::Airborne;
        self.observed.send_replace(*state);
        tracing::info!("drone airborne");
        Ok(())
    }

    /// Land
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightState`] when confirmed grounded, or the link
    /// error if the drone rejects the command
    pub async fn land(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !self.may_be_flying(*state) {
            return Err(Error::FlightState {
                command: "land".to_string(),
                state: *state,
            });
        }

        self.link.send(DroneCommand::Land).await?;
        self.takeoff_unconfirmed.store(false, Ordering::SeqCst);
        *state = FlightState::Grounded;
        self.observed.send_replace(*state);
        tracing::info!("drone grounded");
        Ok(())
    }

    /// Land unless confirmed grounded
    ///
    /// Returns whether a landing was performed.
    ///
    /// # Errors
    ///
    /// Returns the link error if the landing command fails
    pub async fn land_if_airborne(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !self.may_be_flying(*state) {
            return Ok(false);
        }

        self.link.send(DroneCommand::Land).await?;
        self.takeoff_unconfirmed.store(false, Ordering::SeqCst);
        *state = FlightState::Grounded;
        self.observed.send_replace(*state);
        tracing::info!("drone grounded");
        Ok(true)
    }

    /// Translate by `distance` centimetres
    ///
    /// # Errors
    ///
    /// Returns error if grounded, if the distance is outside the SDK range,
    /// or if the drone rejects the move
    pub async fn translate(&self, direction: Direction, distance: f64) -> Result<()> {
        let state = self.state.lock().await;
        require_airborne(*state, &format!("move {direction}"))?;
        let cm = to_sdk_units(distance, MIN_MOVE_CM, MAX_MOVE_CM, "distance")?;

        tracing::debug!(%direction, cm, "moving");
        self.link.send(DroneCommand::Move(direction, cm)).await?;
        Ok(())
    }

    /// Rotate by `angle` degrees
    ///
    /// # Errors
    ///
    /// Returns error if grounded, if the angle is outside the SDK range, or
    /// if the drone rejects the rotation
    pub async fn rotate(&self, rotation: Rotation, angle: f64) -> Result<()> {
        let state = self.state.lock().await;
        require_airborne(*state, &format!("rotate {rotation}"))?;
        let degrees = to_sdk_units(angle, MIN_ROTATE_DEG, MAX_ROTATE_DEG, "angle")?;

        tracing::debug!(%rotation, degrees, "rotating");
        self.link.send(DroneCommand::Rotate(rotation, degrees)).await?;
        Ok(())
    }

    /// Flip in a direction
    ///
    /// # Errors
    ///
    /// Returns error if grounded or if the drone rejects the flip
    pub async fn flip(&self, direction: FlipDirection) -> Result<()> {
        let state = self.state.lock().await;
        require_airborne(*state, &format!("flip {direction}"))?;

        tracing::debug!(%direction, "flipping");
        self.link.send(DroneCommand::Flip(direction)).await?;
        Ok(())
    }

    /// Report flight state and battery level
    ///
    /// A failed battery query is logged and reported as unknown.
    pub async fn status(&self) -> DroneStatus {
        let state = self.state.lock().await;

        let battery_percent = match self.link.send(DroneCommand::Battery).await {
            Ok(reply) => reply.trim().parse::<u8>().ok(),
            Err(e) => {
                tracing::warn!(error = %e, "battery query failed");
                None
            }
        };

        DroneStatus {
            flight_state: *state,
            battery_percent,
        }
    }

    /// Stop the video stream at the end of a session
    ///
    /// # Errors
    ///
    /// Returns the link error if the drone does not acknowledge
    pub async fn end(&self) -> Result<()> {
        let _guard = self.state.lock().await;
        self.link.send(DroneCommand::StreamOff).await?;
        Ok(())
    }
}

fn require_airborne(state: FlightState, command: &str) -> Result<()> {
    if state == FlightState::Airborne {
        Ok(())
    } else {
        Err(Error::FlightState {
            command: command.to_string(),
            state,
        })
    }
}

/// Round a caller-supplied magnitude to whole SDK units within `[min, max]`
fn to_sdk_units(value: f64, min: u32, max: u32, what: &str) -> Result<u32> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidCommand(format!(
            "{what} must be a positive number, got {value}"
        )));
    }

    let rounded = value.round();
    if rounded < f64::from(min) || rounded > f64::from(max) {
        return Err(Error::InvalidCommand(format!(
            "{what} must be between {min} and {max}, got {value}"
        )));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(rounded as u32)
}
