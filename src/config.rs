//! Configuration management
//!
//! Everything comes from the environment. API keys are optional at load
//! time; each mode asks for the ones it needs through the `require_*`
//! helpers, which fail with [`Error::Config`] naming the missing variable.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::drone::DEFAULT_TELLO_ADDR;
use crate::gemini::DEFAULT_MODEL;
use crate::voice::DEFAULT_REALTIME_URL;
use crate::{Error, Result};

/// Default forward/back/left/right/up/down distance in centimetres
pub const DEFAULT_MOVE_CM: f64 = 20.0;

/// Default port for the local camera viewer
pub const DEFAULT_DISPLAY_PORT: u16 = 8890;

/// How often a camera frame is published
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(1);

const SNAPSHOT_FILE: &str = "snapshot.jpg";
const AUDIO_FILE: &str = "reply.mp3";

/// Voice pilot configuration
#[derive(Debug)]
pub struct Config {
    /// AssemblyAI key for realtime transcription
    pub assemblyai_api_key: Option<SecretString>,
    /// Google key for Gemini dialogue and vision
    pub google_api_key: Option<SecretString>,
    /// OpenWeather key for the safety check
    pub openweather_api_key: Option<SecretString>,
    /// Optional `OpenAI` TTS voice
    pub openai_api_key: Option<SecretString>,
    /// Optional ElevenLabs TTS voice
    pub elevenlabs_api_key: Option<SecretString>,
    /// Flying site latitude
    pub latitude: Option<f64>,
    /// Flying site longitude
    pub longitude: Option<f64>,
    /// Gemini model used for dialogue
    pub llm_model: String,
    /// Gemini model used for captions
    pub vision_model: String,
    /// Name the assistant uses for the operator
    pub operator_name: String,
    /// Language code for the Google voice
    pub tts_lang: String,
    /// Default distance for move commands
    pub move_default_cm: f64,
    /// Directory for the snapshot and reply clip
    pub work_dir: PathBuf,
    /// Port for the camera viewer on localhost
    pub display_port: u16,
    /// Tello command address
    pub tello_addr: String,
    /// Realtime transcription endpoint
    pub realtime_url: String,
    /// Frame publish interval
    pub capture_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let move_default_cm = parse(&lookup, "PILOT_MOVE_DEFAULT_CM")?.unwrap_or(DEFAULT_MOVE_CM);
        if !move_default_cm.is_finite() || move_default_cm <= 0.0 {
            return Err(Error::Config(format!(
                "PILOT_MOVE_DEFAULT_CM must be positive, got {move_default_cm}"
            )));
        }

        let work_dir = lookup("PILOT_WORK_DIR").map_or_else(
            || {
                directories::BaseDirs::new().map_or_else(
                    || PathBuf::from(".cache/voice-pilot"),
                    |d| d.cache_dir().join("voice-pilot"),
                )
            },
            PathBuf::from,
        );

        Ok(Self {
            assemblyai_api_key: secret("ASSEMBLYAI_API_KEY"),
            google_api_key: secret("GOOGLE_API_KEY"),
            openweather_api_key: secret("OPENWEATHER_API_KEY"),
            openai_api_key: secret("OPENAI_API_KEY"),
            elevenlabs_api_key: secret("ELEVENLABS_API_KEY"),
            latitude: parse(&lookup, "PILOT_LATITUDE")?,
            longitude: parse(&lookup, "PILOT_LONGITUDE")?,
            llm_model: text("PILOT_LLM_MODEL", DEFAULT_MODEL),
            vision_model: text("PILOT_VISION_MODEL", DEFAULT_MODEL),
            operator_name: text("PILOT_OPERATOR_NAME", "pilot"),
            tts_lang: text("PILOT_TTS_LANG", "en"),
            move_default_cm,
            work_dir,
            display_port: parse(&lookup, "PILOT_DISPLAY_PORT")?.unwrap_or(DEFAULT_DISPLAY_PORT),
            tello_addr: text("TELLO_ADDR", DEFAULT_TELLO_ADDR),
            realtime_url: text("ASSEMBLYAI_REALTIME_URL", DEFAULT_REALTIME_URL),
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
        })
    }

    /// Where the latest camera snapshot is written
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.work_dir.join(SNAPSHOT_FILE)
    }

    /// Where the latest synthesized reply is written
    #[must_use]
    pub fn audio_path(&self) -> PathBuf {
        self.work_dir.join(AUDIO_FILE)
    }

    /// # Errors
    ///
    /// Returns error if `ASSEMBLYAI_API_KEY` is not set
    pub fn require_assemblyai_key(&self) -> Result<SecretString> {
        required(self.assemblyai_api_key.as_ref(), "ASSEMBLYAI_API_KEY")
    }

    /// # Errors
    ///
    /// Returns error if `GOOGLE_API_KEY` is not set
    pub fn require_google_key(&self) -> Result<SecretString> {
        required(self.google_api_key.as_ref(), "GOOGLE_API_KEY")
    }

    /// # Errors
    ///
    /// Returns error if `OPENWEATHER_API_KEY` is not set
    pub fn require_openweather_key(&self) -> Result<SecretString> {
        required(self.openweather_api_key.as_ref(), "OPENWEATHER_API_KEY")
    }

    /// Latitude and longitude of the flying site
    ///
    /// # Errors
    ///
    /// Returns error if either coordinate is missing
    pub fn require_location(&self) -> Result<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err(Error::Config(
                "PILOT_LATITUDE and PILOT_LONGITUDE must both be set".to_string(),
            )),
        }
    }
}

fn required(key: Option<&SecretString>, name: &str) -> Result<SecretString> {
    key.map(|k| SecretString::from(k.expose_secret().to_owned()))
        .ok_or_else(|| Error::Config(format!("{name} is not set")))
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {key} {v:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[("PILOT_WORK_DIR", "/tmp/pilot")]).unwrap();
        assert_eq!(config.llm_model, DEFAULT_MODEL);
        assert_eq!(config.vision_model, DEFAULT_MODEL);
        assert_eq!(config.tts_lang, "en");
        assert!((config.move_default_cm - DEFAULT_MOVE_CM).abs() < f64::EPSILON);
        assert_eq!(config.display_port, DEFAULT_DISPLAY_PORT);
        assert_eq!(config.tello_addr, DEFAULT_TELLO_ADDR);
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/pilot/snapshot.jpg"));
        assert_eq!(config.audio_path(), PathBuf::from("/tmp/pilot/reply.mp3"));
        assert!(config.google_api_key.is_none());
    }

    #[test]
    fn reads_keys_and_location() {
        let config = load(&[
            ("GOOGLE_API_KEY", "g-key"),
            ("PILOT_LATITUDE", "51.5"),
            ("PILOT_LONGITUDE", " -0.12 "),
            ("PILOT_MOVE_DEFAULT_CM", "35"),
        ])
        .unwrap();

        assert_eq!(config.require_google_key().unwrap().expose_secret(), "g-key");
        let (lat, lon) = config.require_location().unwrap();
        assert!((lat - 51.5).abs() < 1e-9 && (lon + 0.12).abs() < 1e-9);
        assert!((config.move_default_cm - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_keys_name_the_variable() {
        let config = load(&[("ASSEMBLYAI_API_KEY", "  ")]).unwrap();
        let err = config.require_assemblyai_key().unwrap_err();
        assert!(err.to_string().contains("ASSEMBLYAI_API_KEY"));
        assert!(matches!(config.require_location(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unparseable_values() {
        assert!(matches!(load(&[("PILOT_DISPLAY_PORT", "http")]), Err(Error::Config(_))));
        assert!(matches!(load(&[("PILOT_MOVE_DEFAULT_CM", "-5")]), Err(Error::Config(_))));
    }
}
