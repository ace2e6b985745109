//! Runs resolved commands against the drone and its helpers

use std::sync::Arc;

use super::Command;
use crate::Result;
use crate::drone::ActuatorController;
use crate::safety::SafetyGate;
use crate::vision::VisionQuery;

/// Reported when the weather service cannot be reached
pub const WEATHER_UNAVAILABLE: &str = "I can't check the weather right now.";

/// Reported when a call resolves to no commands
pub const NOTHING_TO_DO: &str = "Nothing to do.";

/// Executes [`Command`]s one at a time
pub struct CommandExecutor {
    controller: Arc<ActuatorController>,
    safety: Arc<SafetyGate>,
    vision: Arc<VisionQuery>,
}

impl CommandExecutor {
    #[must_use]
    pub const fn new(
        controller: Arc<ActuatorController>,
        safety: Arc<SafetyGate>,
        vision: Arc<VisionQuery>,
    ) -> Self {
        Self {
            controller,
            safety,
            vision,
        }
    }

    /// Run a single command, returning a short description of the outcome
    ///
    /// Weather and vision failures are reported as text rather than errors.
    ///
    /// # Errors
    ///
    /// Returns error if the drone rejects or fails the command
    pub async fn run(&self, command: &Command) -> Result<String> {
        tracing::info!(?command, "executing command");

        let outcome = match command {
            Command::Takeoff => {
                self.controller.takeoff().await?;
                "Took off.".to_string()
            }
            Command::Land => {
                self.controller.land().await?;
                "Landed.".to_string()
            }
            Command::Move {
                direction,
                distance_cm,
            } => {
                self.controller.translate(*direction, *distance_cm).await?;
                format!("Moved {direction} {distance_cm:.0} cm.")
            }
            Command::Rotate { rotation, degrees } => {
                self.controller.rotate(*rotation, *degrees).await?;
                format!("Rotated {rotation} {degrees:.0} degrees.")
            }
            Command::Flip(direction) => {
                self.controller.flip(*direction).await?;
                format!("Flipped {direction}.")
            }
            Command::Describe { instruction } => self.vision.describe(instruction).await,
            Command::CheckWeather => match self.safety.check().await {
                Ok(verdict) => verdict.explanation,
                Err(e) => {
                    tracing::warn!(error = %e, "weather check failed");
                    WEATHER_UNAVAILABLE.to_string()
                }
            },
            Command::QueryStatus => {
                let status = self.controller.status().await;
                format!("The drone is {status}.")
            }
        };

        Ok(outcome)
    }

    /// Run commands in order, stopping at the first failure
    ///
    /// # Errors
    ///
    /// Returns the first command error; later commands are not attempted
    pub async fn run_all(&self, commands: &[Command]) -> Result<String> {
        if commands.is_empty() {
            return Ok(NOTHING_TO_DO.to_string());
        }

        let mut outcomes = Vec::with_capacity(commands.len());
        for command in commands {
            outcomes.push(self.run(command).await?);
        }
        Ok(outcomes.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::Error;
    use crate::camera::FrameStore;
    use crate::drone::{Direction, DroneCommand, DroneLink, FlightState, SimulatedDrone};
    use crate::safety::{Conditions, WeatherSource};
    use crate::vision::{Captioner, NO_FRAME_DESCRIPTION};

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

    struct Offline;

    #[async_trait]
    impl WeatherSource for Offline {
        async fn current(&self) -> Result<Conditions> {
            Err(Error::Weather("connection refused".to_string()))
        }
    }

    struct Blind;

    #[async_trait]
    impl Captioner for Blind {
        async fn caption(&self, _jpeg: &[u8], _instruction: &str) -> Result<String> {
            Err(Error::Vision("unreachable".to_string()))
        }
    }

    fn executor(
        weather: Arc<dyn WeatherSource>,
    ) -> (tempfile::TempDir, Arc<SimulatedDrone>, CommandExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedDrone::new());
        let controller = Arc::new(ActuatorController::new(
            Arc::clone(&sim) as Arc<dyn DroneLink>
        ));
        let frames = Arc::new(FrameStore::new(dir.path().join("snapshot.jpg")));
        let executor = CommandExecutor::new(
            controller,
            Arc::new(SafetyGate::new(weather)),
            Arc::new(VisionQuery::new(frames, Arc::new(Blind))),
        );
        (dir, sim, executor)
    }

    #[tokio::test]
    async fn takeoff_then_move() {
        let (_dir, sim, executor) = executor(Arc::new(Calm));

        let out = executor
            .run_all(&[
                Command::Takeoff,
                Command::Move {
                    direction: Direction::Up,
                    distance_cm: 50.0,
                },
            ])
            .await
            .unwrap();

        assert_eq!(out, "Took off. Moved up 50 cm.");
        assert_eq!(
            sim.sent(),
            vec![DroneCommand::Takeoff, DroneCommand::Move(Direction::Up, 50)]
        );
        assert_eq!(executor.controller.flight_state().await, FlightState::Airborne);
    }

    #[tokio::test]
    async fn grounded_move_is_rejected_and_later_commands_skipped() {
        let (_dir, sim, executor) = executor(Arc::new(Calm));

        let err = executor
            .run_all(&[
                Command::Move {
                    direction: Direction::Forward,
                    distance_cm: 30.0,
                },
                Command::Takeoff,
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FlightState { .. }));
        assert!(sim.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_call_does_nothing() {
        let (_dir, sim, executor) = executor(Arc::new(Calm));
        assert_eq!(executor.run_all(&[]).await.unwrap(), NOTHING_TO_DO);
        assert!(sim.sent().is_empty());
    }

    #[tokio::test]
    async fn weather_outage_is_reported_as_text() {
        let (_dir, _sim, executor) = executor(Arc::new(Offline));
        assert_eq!(
            executor.run(&Command::CheckWeather).await.unwrap(),
            WEATHER_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn weather_verdict_is_explained() {
        let (_dir, _sim, executor) = executor(Arc::new(Calm));
        let out = executor.run(&Command::CheckWeather).await.unwrap();
        assert!(out.starts_with("Conditions look good"));
    }

    #[tokio::test]
    async fn describe_without_frame() {
        let (_dir, _sim, executor) = executor(Arc::new(Calm));
        let out = executor
            .run(&Command::Describe {
                instruction: "look".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(out, NO_FRAME_DESCRIPTION);
    }

    #[tokio::test]
    async fn status_reports_battery() {
        let (_dir, sim, executor) = executor(Arc::new(Calm));
        sim.set_battery(64);
        let out = executor.run(&Command::QueryStatus).await.unwrap();
        assert_eq!(out, "The drone is grounded, battery at 64%.");
    }
}
