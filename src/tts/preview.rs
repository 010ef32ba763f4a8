//! One-shot line previews in a character voice.
//!
//! Separate from the narrator's streaming voice so the listener can tell
//! the director from the character being directed.

use crate::config::PreviewConfig;
use crate::error::{Result, StoryError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who is speaking the previewed line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterGender {
    Male,
    Female,
    #[default]
    Neutral,
}

const FEMALE_WORDS: &[&str] = &[
    "she", "her", "hers", "herself", "sarah", "emma", "mary", "jane", "lisa",
];
const MALE_WORDS: &[&str] = &[
    "he", "him", "his", "himself", "marcus", "john", "david", "michael", "james",
];
const SPEECH_VERBS: &[&str] = &["said", "replied", "whispered"];

impl CharacterGender {
    /// Lenient parse; anything unrecognized is neutral.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Self::Male,
            "female" | "f" => Self::Female,
            _ => Self::Neutral,
        }
    }

    /// Guess from pronouns, a few common names and dialogue attribution
    /// ("she said"). Ties are neutral.
    #[must_use]
    pub fn infer(text: &str, context: &str) -> Self {
        let full = format!("{text} {context}").to_lowercase();
        let words: Vec<&str> = full
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let score = |indicators: &[&str], pronoun: &str| {
            let mut score = indicators
                .iter()
                .filter(|needle| words.contains(*needle))
                .count();
            score += SPEECH_VERBS
                .iter()
                .filter(|verb| words.windows(2).any(|w| w[0] == pronoun && w[1] == **verb))
                .count();
            score
        };

        let female = score(FEMALE_WORDS, "she");
        let male = score(MALE_WORDS, "he");
        match female.cmp(&male) {
            std::cmp::Ordering::Greater => Self::Female,
            std::cmp::Ordering::Less => Self::Male,
            std::cmp::Ordering::Equal => Self::Neutral,
        }
    }
}

#[derive(Serialize)]
struct PreviewRequest<'a> {
    text: &'a str,
    reference_id: &'a str,
    format: &'a str,
    latency: &'a str,
}

/// HTTP client for preview synthesis.
#[derive(Clone)]
pub struct PreviewClient {
    config: PreviewConfig,
    api_key: String,
    client: reqwest::Client,
}

impl PreviewClient {
    /// Build a client whose requests are bounded by `timeout_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Tts`] if the HTTP client cannot be built.
    pub fn new(config: PreviewConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoryError::Tts(format!("failed to build preview HTTP client: {e}")))?;
        if config.male_voice_id.is_empty() || config.female_voice_id.is_empty() {
            warn!("character voice ids not configured; previews may use the service default");
        }
        Ok(Self {
            config,
            api_key: api_key.into(),
            client,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Voice for a character. Neutral uses the male voice; an unset voice
    /// falls back to the other one.
    #[must_use]
    pub fn select_voice(&self, gender: CharacterGender) -> &str {
        let (preferred, fallback) = match gender {
            CharacterGender::Female => (&self.config.female_voice_id, &self.config.male_voice_id),
            CharacterGender::Male | CharacterGender::Neutral => {
                (&self.config.male_voice_id, &self.config.female_voice_id)
            }
        };
        if preferred.is_empty() {
            fallback
        } else {
            preferred
        }
    }

    /// Where the preview for `text` is written.
    #[must_use]
    pub fn output_path(&self, text: &str) -> PathBuf {
        let digest = Sha256::digest(text.as_bytes());
        let hash: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
        let dir = self
            .config
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        dir.join(format!("storyva_preview_{hash}.{}", self.config.format))
    }

    /// Synthesize `text` in a character voice and save it.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::Tts`] for transport failures or a non-2xx
    /// response (status and body included), [`StoryError::Io`] if the file
    /// cannot be written.
    pub async fn generate(&self, text: &str, gender: CharacterGender) -> Result<PathBuf> {
        let voice = self.select_voice(gender);
        let body = PreviewRequest {
            text,
            reference_id: voice,
            format: &self.config.format,
            latency: &self.config.latency,
        };
        let prefix: String = text.chars().take(40).collect();
        info!(?gender, text = %prefix, "generating preview");

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoryError::Tts(format!("preview request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(500).collect();
            return Err(StoryError::Tts(format!(
                "preview service error: {} - {body}",
                status.as_u16()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| StoryError::Tts(format!("preview body read failed: {e}")))?;
        let path = self.output_path(text);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &audio).await?;
        debug!(path = %path.display(), bytes = audio.len(), "preview saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, dir: &std::path::Path) -> PreviewClient {
        PreviewClient::new(
            PreviewConfig {
                endpoint: format!("{}/v1/tts", server.uri()),
                male_voice_id: "male-voice".into(),
                female_voice_id: "female-voice".into(),
                output_dir: Some(dir.to_path_buf()),
                ..PreviewConfig::default()
            },
            "test-key",
        )
        .unwrap()
    }

    #[test]
    fn gender_inference_follows_attribution() {
        assert_eq!(
            CharacterGender::infer("\"I'm leaving,\" she said.", ""),
            CharacterGender::Female
        );
        assert_eq!(
            CharacterGender::infer("\"Hello,\" Marcus replied.", ""),
            CharacterGender::Male
        );
        assert_eq!(
            CharacterGender::infer("\"Hello.\"", "the stranger"),
            CharacterGender::Neutral
        );
        // "the" and "there" are not pronouns.
        assert_eq!(
            CharacterGender::infer("There, the end.", ""),
            CharacterGender::Neutral
        );
    }

    #[test]
    fn parse_is_lenient() {
        assert_eq!(CharacterGender::parse(" Female "), CharacterGender::Female);
        assert_eq!(CharacterGender::parse("m"), CharacterGender::Male);
        assert_eq!(CharacterGender::parse("robot"), CharacterGender::Neutral);
    }

    #[test]
    fn neutral_uses_male_voice_with_fallback() {
        let mut config = PreviewConfig {
            male_voice_id: "m".into(),
            female_voice_id: "f".into(),
            ..PreviewConfig::default()
        };
        let c = PreviewClient::new(config.clone(), "k").unwrap();
        assert_eq!(c.select_voice(CharacterGender::Neutral), "m");
        assert_eq!(c.select_voice(CharacterGender::Female), "f");

        config.male_voice_id.clear();
        let c = PreviewClient::new(config, "k").unwrap();
        assert_eq!(c.select_voice(CharacterGender::Neutral), "f");
    }

    #[tokio::test]
    async fn generate_posts_and_saves_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tts"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "text": "(sad) I'm leaving.",
                "reference_id": "female-voice",
                "format": "mp3",
                "latency": "balanced",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3audio".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let c = client(&server, dir.path());
        let saved = c
            .generate("(sad) I'm leaving.", CharacterGender::Female)
            .await
            .unwrap();

        assert_eq!(saved, c.output_path("(sad) I'm leaving."));
        assert!(
            saved
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("storyva_preview_")
        );
        assert_eq!(std::fs::read(&saved).unwrap(), b"ID3audio");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tts"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient balance"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = client(&server, dir.path())
            .generate("Hello.", CharacterGender::Neutral)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("402"), "{message}");
        assert!(message.contains("insufficient balance"), "{message}");
    }

    #[tokio::test]
    async fn slow_service_hits_the_configured_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let c = PreviewClient::new(
            PreviewConfig {
                endpoint: format!("{}/v1/tts", server.uri()),
                timeout_secs: 1,
                output_dir: Some(dir.path().to_path_buf()),
                ..PreviewConfig::default()
            },
            "test-key",
        )
        .unwrap();

        let err = c
            .generate("Too slow.", CharacterGender::Neutral)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("preview request failed"));
    }
}
