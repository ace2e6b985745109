//! In-process drone for running without hardware

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{DroneCommand, DroneLink};
use crate::{Error, Result};

#[derive(Debug)]
struct SimState {
    sent: Vec<DroneCommand>,
    failing: HashSet<DroneCommand>,
    delays: HashMap<DroneCommand, Duration>,
    battery: u8,
}

/// A drone that acknowledges everything and records what it was sent
///
/// Used by `--simulate` and by tests. Individual commands can be made to
/// fail with [`SimulatedDrone::fail_on`] or to answer late with
/// [`SimulatedDrone::delay_on`].
#[derive(Debug)]
pub struct SimulatedDrone {
    state: Mutex<SimState>,
}

impl Default for SimulatedDrone {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDrone {
    /// Create a simulated drone with a full battery
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                sent: Vec::new(),
                failing: HashSet::new(),
                delays: HashMap::new(),
                battery: 100,
            }),
        }
    }

    /// Make every future `command` fail
    pub fn fail_on(&self, command: DroneCommand) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(command);
        }
    }

    /// Hold the reply to every future `command` for `delay`
    ///
    /// The command is recorded as soon as it arrives.
    pub fn delay_on(&self, command: DroneCommand, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.insert(command, delay);
        }
    }

    /// Set the reported battery level
    pub fn set_battery(&self, percent: u8) {
        if let Ok(mut state) = self.state.lock() {
            state.battery = percent;
        }
    }

    /// Commands accepted so far, in order
    #[must_use]
    pub fn sent(&self) -> Vec<DroneCommand> {
        self.state
            .lock()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    /// How many times `command` was accepted
    #[must_use]
    pub fn count(&self, command: DroneCommand) -> usize {
        self.sent().iter().filter(|c| **c == command).count()
    }
}

#[async_trait]
impl DroneLink for SimulatedDrone {
    async fn send(&self, command: DroneCommand) -> Result<String> {
        let (reply, delay) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Actuator("simulator state poisoned".to_string()))?;

            if state.failing.contains(&command) {
                tracing::debug!(command = %command.to_sdk(), "simulated drone rejecting command");
                return Err(Error::Actuator(format!(
                    "{} failed: simulated error",
                    command.to_sdk()
                )));
            }

            tracing::debug!(command = %command.to_sdk(), "simulated drone ok");
            state.sent.push(command);

            let reply = match command {
                DroneCommand::Battery => state.battery.to_string(),
                _ => "ok".to_string(),
            };
            (reply, state.delays.get(&command).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(reply)
    }
}
