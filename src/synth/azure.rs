//! Azure Cognitive Services text-to-speech over REST.

use super::{decode_pcm_stream, PcmStream, SpeechEngine};
use crate::{error::SynthesisError, text::Speech};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};

const OUTPUT_FORMAT: &str = "raw-48khz-16bit-mono-pcm";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct AzureSpeech {
    client: Client,
    endpoint: String,
    key: String,
}

impl AzureSpeech {
    pub fn new(key: impl Into<String>, region: &str) -> Result<Self, SynthesisError> {
        let endpoint = format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1");
        Self::with_endpoint(key, endpoint)
    }

    /// Point the engine at a custom endpoint, e.g. a container or a test server.
    pub fn with_endpoint(
        key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, SynthesisError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            key: key.into(),
        })
    }
}

#[async_trait]
impl SpeechEngine for AzureSpeech {
    async fn synthesize(&self, speech: &Speech) -> Result<PcmStream, SynthesisError> {
        debug!("Synthesizing {} chars with {}", speech.text.len(), speech.voice);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(CONTENT_TYPE, "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(speech.ssml.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_pcm_stream(response.bytes_stream()))
    }
}
