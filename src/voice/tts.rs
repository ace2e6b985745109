//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

const GOOGLE_TRANSLATE_TTS_URL: &str = "https://translate.google.com/translate_tts";

/// Longest text the Google Translate endpoint accepts per request
const GOOGLE_MAX_CHARS: usize = 200;

/// Something that turns text into MP3 audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, returning MP3 bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// TTS provider backend
#[derive(Debug)]
enum TtsProvider {
    /// Keyless Google Translate voice for a language code
    Google { lang: String },
    OpenAI { api_key: SecretString, voice: String, speed: f32 },
    ElevenLabs { api_key: SecretString, voice_id: String },
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a TTS instance using the Google Translate voice for `lang`
    #[must_use]
    pub fn new_google(lang: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: String::new(),
            provider: TtsProvider::Google { lang: lang.into() },
        }
    }

    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, voice: String, speed: f32) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            model: "tts-1".to_string(),
            provider: TtsProvider::OpenAI {
                api_key,
                voice,
                speed,
            },
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            model: "eleven_monolingual_v1".to_string(),
            provider: TtsProvider::ElevenLabs { api_key, voice_id },
        })
    }

    /// Provider name for logging
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        match self.provider {
            TtsProvider::Google { .. } => "google",
            TtsProvider::OpenAI { .. } => "openai",
            TtsProvider::ElevenLabs { .. } => "elevenlabs",
        }
    }

    /// Synthesize using the Google Translate voice
    ///
    /// Long text is split at word boundaries; the MP3 pieces are
    /// concatenated, which decoders play back as one stream.
    async fn synthesize_google(&self, text: &str, lang: &str) -> Result<Vec<u8>> {
        let mut audio = Vec::new();
        for piece in split_for_tts(text, GOOGLE_MAX_CHARS) {
            let response = self
                .client
                .get(GOOGLE_TRANSLATE_TTS_URL)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", lang),
                    ("q", piece.as_str()),
                ])
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Tts(format!("Google TTS error {status}: {body}")));
            }

            audio.extend_from_slice(&response.bytes().await?);
        }
        Ok(audio)
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(
        &self,
        text: &str,
        api_key: &SecretString,
        voice: &str,
        speed: f32,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(
        &self,
        text: &str,
        api_key: &SecretString,
        voice_id: &str,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match &self.provider {
            TtsProvider::Google { lang } => self.synthesize_google(text, lang).await,
            TtsProvider::OpenAI {
                api_key,
                voice,
                speed,
            } => self.synthesize_openai(text, api_key, voice, *speed).await,
            TtsProvider::ElevenLabs { api_key, voice_id } => {
                self.synthesize_elevenlabs(text, api_key, voice_id).await
            }
        }
    }
}

/// Split text into pieces of at most `max_chars` characters at word
/// boundaries; a single overlong word is cut
#[must_use]
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            pieces.push(head);
        }

        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if needed > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_piece() {
        assert_eq!(split_for_tts("  Took off.  ", 200), vec!["Took off."]);
        assert!(split_for_tts("   ", 200).is_empty());
    }

    #[test]
    fn splits_at_word_boundaries() {
        let pieces = split_for_tts("one two three four", 9);
        assert_eq!(pieces, vec!["one two", "three", "four"]);
        assert!(pieces.iter().all(|p| p.chars().count() <= 9));
    }

    #[test]
    fn cuts_overlong_words() {
        assert_eq!(split_for_tts("abcdefgh ij", 3), vec!["abc", "def", "gh", "ij"]);
    }

    #[test]
    fn empty_keys_are_rejected() {
        let openai = TextToSpeech::new_openai(SecretString::from(String::new()), "alloy".to_string(), 1.0);
        assert!(matches!(openai, Err(Error::Config(_))));
        assert_eq!(TextToSpeech::new_google("en").provider_name(), "google");
    }
}
