//! Pre-flight weather check
//!
//! Advisory only: the gate reports whether conditions are within the drone's
//! rated limits and why, but never changes flight state itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Highest wind speed considered safe, in metres per second
///
/// The Tello's user manual limits flight to wind below 10 km/h (about
/// 2.8 m/s); anything stronger exceeds what the airframe can hold against.
pub const SAFE_WIND_SPEED_MPS: f64 = 10.0 / 3.6;

/// OpenWeather condition codes below this are precipitation, storms, or
/// obscured atmosphere; 800 and up are clear or cloudy skies
pub const CLEAR_CONDITION_MIN: u32 = 800;

const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Current conditions at the flight location
#[derive(Debug, Clone, PartialEq)]
pub struct Conditions {
    /// Human-readable summary, e.g. "light rain"
    pub description: String,
    /// OpenWeather condition id
    pub condition_code: u32,
    /// Degrees Celsius
    pub temperature: f64,
    /// Metres per second
    pub wind_speed: f64,
}

/// Go/no-go verdict for flying now
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub description: String,
    pub condition_code: u32,
    pub temperature: f64,
    pub wind_speed: f64,
    pub is_safe: bool,
    pub explanation: String,
}

impl SafetyVerdict {
    /// Judge `conditions` against the rated limits
    #[must_use]
    pub fn evaluate(conditions: Conditions) -> Self {
        let too_windy = conditions.wind_speed > SAFE_WIND_SPEED_MPS;
        let bad_sky = conditions.condition_code < CLEAR_CONDITION_MIN;

        let mut reasons = Vec::new();
        if too_windy {
            reasons.push(format!(
                "the wind is {:.1} m/s, above the safe limit of {SAFE_WIND_SPEED_MPS:.1} m/s",
                conditions.wind_speed
            ));
        }
        if bad_sky {
            reasons.push(format!(
                "the weather is {}, which is not safe for flying",
                conditions.description
            ));
        }

        let is_safe = reasons.is_empty();
        let explanation = if is_safe {
            format!(
                "Conditions look good: {}, {:.0}°C, wind {:.1} m/s.",
                conditions.description, conditions.temperature, conditions.wind_speed
            )
        } else {
            format!("It's not safe to fly: {}.", reasons.join(" and "))
        };

        Self {
            description: conditions.description,
            condition_code: conditions.condition_code,
            temperature: conditions.temperature,
            wind_speed: conditions.wind_speed,
            is_safe,
            explanation,
        }
    }
}

/// Source of current weather
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch current conditions
    async fn current(&self) -> Result<Conditions>;
}

/// Pre-flight safety check
pub struct SafetyGate {
    source: Arc<dyn WeatherSource>,
}

impl SafetyGate {
    /// Create a gate reading from `source`
    #[must_use]
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }

    /// Fetch fresh conditions and judge them
    ///
    /// # Errors
    ///
    /// Returns error if the weather lookup fails
    pub async fn check(&self) -> Result<SafetyVerdict> {
        let conditions = self.source.current().await?;
        let verdict = SafetyVerdict::evaluate(conditions);
        tracing::info!(
            is_safe = verdict.is_safe,
            wind_speed = verdict.wind_speed,
            condition_code = verdict.condition_code,
            "safety check"
        );
        Ok(verdict)
    }
}

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    current: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temp: f64,
    wind_speed: f64,
    weather: Vec<WeatherEntry>,
}

#[derive(Debug, Deserialize)]
struct WeatherEntry {
    id: u32,
    description: String,
}

impl TryFrom<OneCallResponse> for Conditions {
    type Error = Error;

    fn try_from(response: OneCallResponse) -> Result<Self> {
        let current = response.current;
        let entry = current
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| Error::Weather("response has no weather entry".to_string()))?;

        Ok(Self {
            description: entry.description,
            condition_code: entry.id,
            temperature: current.temp,
            wind_speed: current.wind_speed,
        })
    }
}

/// OpenWeather One Call client for a fixed location
pub struct OpenWeatherClient {
    client: reqwest::Client,
    api_key: SecretString,
    latitude: f64,
    longitude: f64,
    base_url: String,
}

impl OpenWeatherClient {
    /// Create a client for the given location
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(api_key: SecretString, latitude: f64, longitude: f64) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            latitude,
            longitude,
            base_url: OPENWEATHER_BASE_URL.to_string(),
        })
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current(&self) -> Result<Conditions> {
        let url = format!("{}/data/3.0/onecall", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", self.latitude.to_string()),
                ("lon", self.longitude.to_string()),
                ("units", "metric".to_string()),
                ("exclude", "minutely,hourly,daily,alerts".to_string()),
                ("appid", self.api_key.expose_secret().to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Weather(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Weather(format!("API error {status}: {body}")));
        }

        let parsed: OneCallResponse = response
            .json()
            .await
            .map_err(|e| Error::Weather(format!("parse error: {e}")))?;

        Conditions::try_from(parsed)
    }
}
