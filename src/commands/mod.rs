//! Command vocabulary exposed to the language model
//!
//! Each [`CommandSpec`] declares a name, a description, typed parameters with
//! defaults, and a builder that turns validated arguments into zero or more
//! [`Command`]s. The registry is built once at startup and never changes.

mod executor;

use std::collections::HashMap;

use serde::Serialize;

pub use executor::{CommandExecutor, NOTHING_TO_DO, WEATHER_UNAVAILABLE};

use crate::drone::{Direction, FlipDirection, Rotation};
use crate::{Error, Result};

/// Default rotation for the rotate commands, in degrees
pub const DEFAULT_ROTATE_DEG: f64 = 90.0;

/// Default rotation for `turn_around`, in degrees
pub const DEFAULT_TURN_AROUND_DEG: f64 = 180.0;

/// A typed actuator invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Takeoff,
    Land,
    Move { direction: Direction, distance_cm: f64 },
    Rotate { rotation: Rotation, degrees: f64 },
    Flip(FlipDirection),
    Describe { instruction: String },
    CheckWeather,
    QueryStatus,
}

/// Parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    Boolean,
}

impl ParamKind {
    const fn schema_type(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// A parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Boolean(bool),
}

impl ParamValue {
    const fn kind(self) -> ParamKind {
        match self {
            Self::Number(_) => ParamKind::Number,
            Self::Boolean(_) => ParamKind::Boolean,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Declared parameter of a command
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub default: ParamValue,
}

impl ParamSpec {
    /// A numeric parameter
    #[must_use]
    pub const fn number(name: &'static str, description: &'static str, default: f64) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::Number,
            default: ParamValue::Number(default),
        }
    }

    /// A boolean parameter
    #[must_use]
    pub const fn flag(name: &'static str, description: &'static str, default: bool) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::Boolean,
            default: ParamValue::Boolean(default),
        }
    }
}

/// Validated arguments with every declared parameter present
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<&'static str, ParamValue>,
}

impl Arguments {
    /// Numeric argument by name
    ///
    /// # Errors
    ///
    /// Returns error if the parameter is missing or not a number
    pub fn number(&self, name: &str) -> Result<f64> {
        match self.values.get(name) {
            Some(ParamValue::Number(n)) => Ok(*n),
            _ => Err(Error::InvalidCommand(format!("missing number '{name}'"))),
        }
    }

    /// Boolean argument by name
    ///
    /// # Errors
    ///
    /// Returns error if the parameter is missing or not a boolean
    pub fn flag(&self, name: &str) -> Result<bool> {
        match self.values.get(name) {
            Some(ParamValue::Boolean(b)) => Ok(*b),
            _ => Err(Error::InvalidCommand(format!("missing flag '{name}'"))),
        }
    }
}

/// Maps validated arguments to commands
pub type Builder = fn(&Arguments) -> Result<Vec<Command>>;

/// A named operation the model may call
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub build: Builder,
}

/// Function declaration handed to the language model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object, absent for commands without parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl CommandSpec {
    fn declaration(&self) -> ToolDeclaration {
        let parameters = (!self.params.is_empty()).then(|| {
            let properties: serde_json::Map<String, serde_json::Value> = self
                .params
                .iter()
                .map(|p| {
                    (
                        p.name.to_string(),
                        serde_json::json!({
                            "type": p.kind.schema_type(),
                            "description": format!("{} (default: {})", p.description, p.default),
                        }),
                    )
                })
                .collect();
            serde_json::json!({
                "type": "object",
                "properties": properties,
            })
        });

        ToolDeclaration {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("command with empty name".to_string()));
        }
        for (i, param) in self.params.iter().enumerate() {
            if self.params[..i].iter().any(|p| p.name == param.name) {
                return Err(Error::Config(format!(
                    "{}: duplicate parameter '{}'",
                    self.name, param.name
                )));
            }
            if param.default.kind() != param.kind {
                return Err(Error::Config(format!(
                    "{}: default for '{}' does not match its type",
                    self.name, param.name
                )));
            }
            if let ParamValue::Number(n) = param.default
                && !(n.is_finite() && n > 0.0)
            {
                return Err(Error::Config(format!(
                    "{}: default for '{}' must be positive",
                    self.name, param.name
                )));
            }
        }
        Ok(())
    }

    fn arguments(&self, args: &serde_json::Value) -> Result<Arguments> {
        let supplied = match args {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map) => map.clone(),
            other => {
                return Err(Error::InvalidCommand(format!(
                    "{}: arguments must be an object, got {other}",
                    self.name
                )));
            }
        };

        for key in supplied.keys() {
            if !self.params.iter().any(|p| p.name == key.as_str()) {
                return Err(Error::InvalidCommand(format!(
                    "{}: unknown parameter '{key}'",
                    self.name
                )));
            }
        }

        let mut values = HashMap::with_capacity(self.params.len());
        for param in &self.params {
            let value = match supplied.get(param.name) {
                None | Some(serde_json::Value::Null) => param.default,
                Some(raw) => parse_value(self.name, param, raw)?,
            };
            values.insert(param.name, value);
        }

        Ok(Arguments { values })
    }
}

fn parse_value(command: &str, param: &ParamSpec, raw: &serde_json::Value) -> Result<ParamValue> {
    match param.kind {
        ParamKind::Number => {
            let n = raw.as_f64().ok_or_else(|| {
                Error::InvalidCommand(format!(
                    "{command}: '{}' must be a number, got {raw}",
                    param.name
                ))
            })?;
            if !(n.is_finite() && n > 0.0) {
                return Err(Error::InvalidCommand(format!(
                    "{command}: '{}' must be positive, got {n}",
                    param.name
                )));
            }
            Ok(ParamValue::Number(n))
        }
        ParamKind::Boolean => raw.as_bool().map(ParamValue::Boolean).ok_or_else(|| {
            Error::InvalidCommand(format!(
                "{command}: '{}' must be true or false, got {raw}",
                param.name
            ))
        }),
    }
}

/// The fixed set of commands for a session
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
    index: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    /// Register `specs` in order
    ///
    /// # Errors
    ///
    /// Returns error if a name is empty or repeated, or a parameter
    /// declaration is inconsistent
    pub fn new(specs: Vec<CommandSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if index.insert(spec.name, i).is_some() {
                return Err(Error::Config(format!("duplicate command '{}'", spec.name)));
            }
        }
        Ok(Self { specs, index })
    }

    /// Command names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    /// Look up a spec by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    /// Tool declarations in registration order
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.specs.iter().map(CommandSpec::declaration).collect()
    }

    /// Validate a call and build its commands
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`] for an unknown command or parameter,
    /// a value of the wrong type, or a non-positive number
    pub fn resolve(&self, name: &str, args: &serde_json::Value) -> Result<Vec<Command>> {
        let spec = self
            .get(name)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown command '{name}'")))?;
        let arguments = spec.arguments(args)?;
        (spec.build)(&arguments)
    }
}

/// The drone's command vocabulary
///
/// `move_default_cm` is the distance used when a move command omits one.
///
/// # Errors
///
/// Returns error if `move_default_cm` is not positive
pub fn default_registry(move_default_cm: f64) -> Result<CommandRegistry> {
    const DISTANCE: &str = "Distance to travel in centimetres, 20 to 500";
    const ANGLE: &str = "Angle to rotate in degrees, 1 to 360";

    let moves = [
        ("move_forward", "Fly forward"),
        ("move_backward", "Fly backward"),
        ("move_left", "Fly left"),
        ("move_right", "Fly right"),
        ("move_up", "Climb"),
        ("move_down", "Descend"),
    ];
    let builders: [Builder; 6] = [
        build_move::<0>,
        build_move::<1>,
        build_move::<2>,
        build_move::<3>,
        build_move::<4>,
        build_move::<5>,
    ];

    let mut specs = vec![CommandSpec {
        name: "takeoff_land",
        description: "Take off or land the drone. Set takeoff to true to take off, land to true to land.",
        params: vec![
            ParamSpec::flag("takeoff", "Take off", false),
            ParamSpec::flag("land", "Land", false),
        ],
        build: build_takeoff_land,
    }];

    specs.extend(moves.into_iter().zip(builders).map(|((name, description), build)| {
        CommandSpec {
            name,
            description,
            params: vec![ParamSpec::number("distance", DISTANCE, move_default_cm)],
            build,
        }
    }));

    specs.extend([
        CommandSpec {
            name: "rotate_clockwise",
            description: "Rotate the drone clockwise",
            params: vec![ParamSpec::number("angle", ANGLE, DEFAULT_ROTATE_DEG)],
            build: build_rotate_clockwise,
        },
        CommandSpec {
            name: "rotate_counterclockwise",
            description: "Rotate the drone counterclockwise",
            params: vec![ParamSpec::number("angle", ANGLE, DEFAULT_ROTATE_DEG)],
            build: build_rotate_counterclockwise,
        },
        CommandSpec {
            name: "turn_around",
            description: "Turn the drone around to face the opposite way",
            params: vec![ParamSpec::number("angle", ANGLE, DEFAULT_TURN_AROUND_DEG)],
            build: build_rotate_clockwise,
        },
        CommandSpec {
            name: "flip",
            description: "Flip the drone. Set the direction to flip in to true.",
            params: vec![
                ParamSpec::flag("forward", "Flip forward", false),
                ParamSpec::flag("back", "Flip backward", false),
                ParamSpec::flag("left", "Flip left", false),
                ParamSpec::flag("right", "Flip right", false),
            ],
            build: build_flip,
        },
        CommandSpec {
            name: "what_do_you_see",
            description: "Look through the drone's camera and describe what is visible. Set read_camera_feed to true to look.",
            params: vec![ParamSpec::flag("read_camera_feed", "Read the camera feed", false)],
            build: build_describe,
        },
        CommandSpec {
            name: "check_weather",
            description: "Check whether the current weather is safe for flying",
            params: Vec::new(),
            build: |_| Ok(vec![Command::CheckWeather]),
        },
        CommandSpec {
            name: "query_status",
            description: "Report whether the drone is flying and its battery level",
            params: Vec::new(),
            build: |_| Ok(vec![Command::QueryStatus]),
        },
    ]);

    CommandRegistry::new(specs)
}

const MOVE_DIRECTIONS: [Direction; 6] = [
    Direction::Forward,
    Direction::Back,
    Direction::Left,
    Direction::Right,
    Direction::Up,
    Direction::Down,
];

fn build_move<const D: usize>(args: &Arguments) -> Result<Vec<Command>> {
    Ok(vec![Command::Move {
        direction: MOVE_DIRECTIONS[D],
        distance_cm: args.number("distance")?,
    }])
}

fn build_takeoff_land(args: &Arguments) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    if args.flag("takeoff")? {
        commands.push(Command::Takeoff);
    }
    if args.flag("land")? {
        commands.push(Command::Land);
    }
    Ok(commands)
}

fn build_rotate_clockwise(args: &Arguments) -> Result<Vec<Command>> {
    Ok(vec![Command::Rotate {
        rotation: Rotation::Clockwise,
        degrees: args.number("angle")?,
    }])
}

fn build_rotate_counterclockwise(args: &Arguments) -> Result<Vec<Command>> {
    Ok(vec![Command::Rotate {
        rotation: Rotation::CounterClockwise,
        degrees: args.number("angle")?,
    }])
}

fn build_flip(args: &Arguments) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    for (name, direction) in [
        ("forward", FlipDirection::Forward),
        ("back", FlipDirection::Back),
        ("left", FlipDirection::Left),
        ("right", FlipDirection::Right),
    ] {
        if args.flag(name)? {
            commands.push(Command::Flip(direction));
        }
    }
    Ok(commands)
}

fn build_describe(args: &Arguments) -> Result<Vec<Command>> {
    if !args.flag("read_camera_feed")? {
        return Ok(Vec::new());
    }
    Ok(vec![Command::Describe {
        instruction: crate::vision::DEFAULT_INSTRUCTION.to_string(),
    }])
}
