//! Drone actuator layer
//!
//! [`ActuatorController`] owns the flight-state machine and is the only
//! component that talks to a [`DroneLink`]. Links translate typed
//! [`DroneCommand`]s into whatever the hardware speaks.

mod controller;
mod sim;
mod tello;

use async_trait::async_trait;

pub use controller::{
    ActuatorController, DroneStatus, MAX_MOVE_CM, MAX_ROTATE_DEG, MIN_MOVE_CM, MIN_ROTATE_DEG,
};
pub use sim::SimulatedDrone;
pub use tello::{DEFAULT_TELLO_ADDR, TelloLink};

use crate::Result;

/// Whether the drone is on the ground or in the air
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightState {
    /// On the ground, motors off
    #[default]
    Grounded,
    /// Flying
    Airborne,
}

impl std::fmt::Display for FlightState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grounded => write!(f, "grounded"),
            Self::Airborne => write!(f, "airborne"),
        }
    }
}

/// Translation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Tello SDK verb for this direction
    #[must_use]
    pub const fn sdk_verb(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sdk_verb())
    }
}

/// Yaw rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clockwise => write!(f, "clockwise"),
            Self::CounterClockwise => write!(f, "counterclockwise"),
        }
    }
}

/// Flip direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlipDirection {
    Forward,
    Back,
    Left,
    Right,
}

impl std::fmt::Display for FlipDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Back => write!(f, "back"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// A single low-level command sent over a [`DroneLink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DroneCommand {
    /// Enter SDK mode
    Connect,
    /// Query battery percentage
    Battery,
    StreamOn,
    StreamOff,
    Takeoff,
    Land,
    /// Translate by a distance in centimetres
    Move(Direction, u32),
    /// Rotate by an angle in degrees
    Rotate(Rotation, u32),
    Flip(FlipDirection),
}

impl DroneCommand {
    /// Render as a Tello SDK command string
    #[must_use]
    pub fn to_sdk(self) -> String {
        match self {
            Self::Connect => "command".to_string(),
            Self::Battery => "battery?".to_string(),
            Self::StreamOn => "streamon".to_string(),
            Self::StreamOff => "streamoff".to_string(),
            Self::Takeoff => "takeoff".to_string(),
            Self::Land => "land".to_string(),
            Self::Move(direction, cm) => format!("{} {cm}", direction.sdk_verb()),
            Self::Rotate(Rotation::Clockwise, deg) => format!("cw {deg}"),
            Self::Rotate(Rotation::CounterClockwise, deg) => format!("ccw {deg}"),
            Self::Flip(FlipDirection::Forward) => "flip f".to_string(),
            Self::Flip(FlipDirection::Back) => "flip b".to_string(),
            Self::Flip(FlipDirection::Left) => "flip l".to_string(),
            Self::Flip(FlipDirection::Right) => "flip r".to_string(),
        }
    }
}

/// Transport to the physical (or simulated) drone
///
/// `send` returns only once the drone has acknowledged the command. The raw
/// reply text is returned for value queries such as [`DroneCommand::Battery`].
#[async_trait]
pub trait DroneLink: Send + Sync {
    /// Send a command and wait for its acknowledgement
    async fn send(&self, command: DroneCommand) -> Result<String>;
}
