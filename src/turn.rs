//! Turn executor: one round trip to the response service
//!
//! A turn never fails outward. Network errors, bad statuses, timeouts and
//! undecodable audio all resolve to [`TurnOutcome::Fallback`] carrying a
//! local utterance to speak without audio.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::customer::IdentityRecord;
use crate::session::TurnKind;
use crate::voice::{AudioClip, decode_audio};
use crate::{Error, Result};

/// Greeting for a first-time customer
pub const NEW_CUSTOMER_GREETING: &str = "Salam! ABB Banka xoş gəlmisiniz. Mən Ayla, sizin virtual köməkçinizəm. Sizə necə kömək edə bilərəm?";

/// Greeting for a customer returning after the staleness window
pub const RETURNING_GREETING: &str = "Yenidən xoş gəldiniz! Sizə necə kömək edə bilərəm?";

/// Spoken when the response service is unavailable
pub const APOLOGY: &str =
    "Üzr istəyirəm, texniki problem yaşayıram. Bir az sonra yenidən cəhd edə bilərsinizmi?";

/// Header carrying the reply text alongside a raw audio body
pub const RESPONSE_TEXT_HEADER: &str = "x-response-text";

/// Local utterances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTexts {
    pub new_customer: String,
    pub returning: String,
    pub apology: String,
}

impl Default for TurnTexts {
    fn default() -> Self {
        Self {
            new_customer: NEW_CUSTOMER_GREETING.to_string(),
            returning: RETURNING_GREETING.to_string(),
            apology: APOLOGY.to_string(),
        }
    }
}

impl TurnTexts {
    #[must_use]
    pub fn greeting(&self, is_new: bool) -> &str {
        if is_new {
            &self.new_customer
        } else {
            &self.returning
        }
    }
}

/// Origin tag sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSource {
    Speech,
    FaceGreeting,
}

/// Body posted to the response service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub source: TurnSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub is_new_customer: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<String>,
}

impl TurnRequest {
    /// Build the request for a turn
    ///
    /// Greetings send the local greeting text as the message so the service
    /// can voice it.
    #[must_use]
    pub fn for_turn(
        kind: &TurnKind,
        identity: Option<&IdentityRecord>,
        is_new_customer: bool,
        texts: &TurnTexts,
        history_turns: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let (message, source) = match kind {
            TurnKind::Speech(text) => (text.clone(), TurnSource::Speech),
            TurnKind::Greeting { is_new } => {
                (texts.greeting(*is_new).to_string(), TurnSource::FaceGreeting)
            }
        };

        Self {
            message,
            timestamp: now,
            source,
            customer_id: identity.map(|r| r.id().to_string()),
            is_new_customer,
            history: identity
                .map(|r| r.conversation_history(history_turns))
                .unwrap_or_default(),
        }
    }
}

/// Raw service reply before decoding
#[derive(Debug, Clone, Default)]
pub struct ServiceReply {
    pub text: Option<String>,
    pub audio: Vec<u8>,
}

/// Remote conversational/audio backend
#[async_trait]
pub trait ResponseService: Send + Sync {
    /// Send one turn and return the reply payload
    ///
    /// # Errors
    ///
    /// Returns `RemoteCall` on network or status failures
    async fn respond(&self, request: &TurnRequest) -> Result<ServiceReply>;
}

#[derive(Deserialize)]
struct JsonReply {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    audio: Option<String>,
}

/// Response service reached through an HTTP webhook
///
/// Accepts either `application/json` `{ "text": .., "audio": "<base64>" }`
/// or a raw `audio/*` body with the text in [`RESPONSE_TEXT_HEADER`].
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl WebhookClient {
    /// Create a webhook client
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the client cannot be built
    pub fn new(url: String, api_key: Option<SecretString>) -> Result<Self> {
        if url.is_empty() {
            return Err(Error::Config("response webhook URL required".to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("kiosk-concierge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }

    fn parse_json(body: &[u8]) -> Result<ServiceReply> {
        let reply: JsonReply = serde_json::from_slice(body)?;
        let audio = match reply.audio {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::RemoteCall(format!("bad audio encoding: {e}")))?,
            None => Vec::new(),
        };
        Ok(ServiceReply {
            text: reply.text,
            audio,
        })
    }
}

#[async_trait]
impl ResponseService for WebhookClient {
    async fn respond(&self, request: &TurnRequest) -> Result<ServiceReply> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::RemoteCall(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteCall(format!("webhook returned {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let header_text = response
            .headers()
            .get(RESPONSE_TEXT_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::RemoteCall(e.to_string()))?;

        if content_type.starts_with("application/json") {
            Self::parse_json(&body)
        } else {
            Ok(ServiceReply {
                text: header_text,
                audio: body.to_vec(),
            })
        }
    }
}

/// How a turn resolved
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Playable reply
    Spoken { text: String, clip: AudioClip },
    /// Service failed; speak this silently
    Fallback { text: String },
}

impl TurnOutcome {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Spoken { text, .. } | Self::Fallback { text } => text,
        }
    }
}

/// Runs turns against a response service with a bounded wait
pub struct TurnExecutor {
    service: Arc<dyn ResponseService>,
    timeout: Duration,
    texts: TurnTexts,
}

impl TurnExecutor {
    #[must_use]
    pub fn new(service: Arc<dyn ResponseService>, timeout: Duration, texts: TurnTexts) -> Self {
        Self {
            service,
            timeout,
            texts,
        }
    }

    #[must_use]
    pub const fn texts(&self) -> &TurnTexts {
        &self.texts
    }

    /// Execute one turn; never fails
    pub async fn execute(&self, request: &TurnRequest) -> TurnOutcome {
        match self.try_execute(request).await {
            Ok((text, clip)) => {
                tracing::info!(
                    source = ?request.source,
                    duration_ms = clip.duration().as_millis(),
                    "response ready"
                );
                TurnOutcome::Spoken { text, clip }
            }
            Err(e) => {
                tracing::warn!(
                    source = ?request.source,
                    kind = ?e.kind(),
                    error = %e,
                    "turn failed, using fallback"
                );
                TurnOutcome::Fallback {
                    text: self.fallback_text(request),
                }
            }
        }
    }

    async fn try_execute(&self, request: &TurnRequest) -> Result<(String, AudioClip)> {
        let reply = tokio::time::timeout(self.timeout, self.service.respond(request))
            .await
            .map_err(|_| {
                Error::RemoteCall(format!(
                    "no response within {} ms",
                    self.timeout.as_millis()
                ))
            })??;

        let clip = decode_audio(&reply.audio)?;
        let text = reply.text.unwrap_or_else(|| match request.source {
            TurnSource::FaceGreeting => request.message.clone(),
            TurnSource::Speech => String::new(),
        });

        Ok((text, clip))
    }

    /// Text spoken when `request` cannot be answered
    #[must_use]
    pub fn fallback_text(&self, request: &TurnRequest) -> String {
        match request.source {
            TurnSource::Speech => self.texts.apology.clone(),
            TurnSource::FaceGreeting => request.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    struct Canned(Result<ServiceReply>);

    #[async_trait]
    impl ResponseService for Canned {
        async fn respond(&self, _request: &TurnRequest) -> Result<ServiceReply> {
            match &self.0 {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(Error::RemoteCall(e.to_string())),
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl ResponseService for Stalled {
        async fn respond(&self, _request: &TurnRequest) -> Result<ServiceReply> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ServiceReply::default())
        }
    }

    fn speech_request(text: &str) -> TurnRequest {
        TurnRequest::for_turn(
            &TurnKind::Speech(text.to_string()),
            None,
            false,
            &TurnTexts::default(),
            10,
            Utc::now(),
        )
    }

    fn executor(service: impl ResponseService + 'static) -> TurnExecutor {
        TurnExecutor::new(Arc::new(service), Duration::from_secs(10), TurnTexts::default())
    }

    #[test]
    fn test_request_wire_format() {
        let request = TurnRequest::for_turn(
            &TurnKind::Greeting { is_new: true },
            None,
            true,
            &TurnTexts::default(),
            10,
            Utc::now(),
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["source"], "face_greeting");
        assert_eq!(json["message"], NEW_CUSTOMER_GREETING);
        assert_eq!(json["is_new_customer"], true);
        assert!(json.get("customer_id").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_json_reply_decoding() {
        let body = br#"{"text":"Salam","audio":"UklGRg=="}"#;
        let reply = WebhookClient::parse_json(body).unwrap();
        assert_eq!(reply.text.as_deref(), Some("Salam"));
        assert_eq!(reply.audio, b"RIFF");
    }

    #[tokio::test]
    async fn test_successful_turn() {
        let wav = samples_to_wav(&[0.2; 1600], 16000).unwrap();
        let outcome = executor(Canned(Ok(ServiceReply {
            text: Some("Kredit haqqında".into()),
            audio: wav,
        })))
        .execute(&speech_request("kredit"))
        .await;

        match outcome {
            TurnOutcome::Spoken { text, clip } => {
                assert_eq!(text, "Kredit haqqında");
                assert_eq!(clip.samples.len(), 1600);
            }
            TurnOutcome::Fallback { .. } => panic!("expected spoken reply"),
        }
    }

    #[tokio::test]
    async fn test_service_error_falls_back_to_apology() {
        let outcome = executor(Canned(Err(Error::RemoteCall("503".into()))))
            .execute(&speech_request("kart"))
            .await;
        assert_eq!(outcome, TurnOutcome::Fallback { text: APOLOGY.to_string() });
    }

    #[tokio::test]
    async fn test_empty_audio_falls_back() {
        let outcome = executor(Canned(Ok(ServiceReply {
            text: Some("ok".into()),
            audio: Vec::new(),
        })))
        .execute(&speech_request("hesab"))
        .await;
        assert!(matches!(outcome, TurnOutcome::Fallback { .. }));
    }

    #[tokio::test]
    async fn test_greeting_falls_back_to_local_text() {
        let request = TurnRequest::for_turn(
            &TurnKind::Greeting { is_new: false },
            None,
            false,
            &TurnTexts::default(),
            10,
            Utc::now(),
        );
        let outcome = executor(Canned(Err(Error::RemoteCall("down".into()))))
            .execute(&request)
            .await;
        assert_eq!(outcome.text(), RETURNING_GREETING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_processing() {
        let outcome = executor(Stalled).execute(&speech_request("filial")).await;
        assert_eq!(outcome, TurnOutcome::Fallback { text: APOLOGY.to_string() });
    }
}
