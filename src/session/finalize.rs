use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;

/// Non-streaming client for the recognition provider's HTTP surface.
///
/// Used for the bounded finalize pass at session stop and for checking a
/// credential before a session starts.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTranscriber {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    /// Probe the provider's projects endpoint to validate the credential,
    /// distinguishing a rejected key from transport failures.
    pub async fn verify_credential(&self) -> Result<()> {
        let url = format!("{}/projects", self.api_base());

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await
            .context("Connection test failed")?;

        if response.status().as_u16() == 401 {
            bail!("Invalid API key. Please check your recognition API key.");
        }
        if !response.status().is_success() {
            bail!("API connection failed: {}", response.status());
        }

        Ok(())
    }

    /// One-shot transcription of buffered session audio. Best effort: the
    /// caller treats any failure as non-fatal.
    pub async fn transcribe(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        channels: u16,
    ) -> Result<String> {
        info!(bytes = pcm.len(), "Running finalize transcription pass");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("encoding", "linear16".to_string()),
                ("sample_rate", sample_rate.to_string()),
                ("channels", channels.to_string()),
                ("smart_format", "true".to_string()),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/raw")
            .body(pcm.to_vec())
            .send()
            .await
            .context("Finalize request failed")?;

        if !response.status().is_success() {
            bail!("Finalize API error: {}", response.status());
        }

        let json: Value = response
            .json()
            .await
            .context("Finalize response was not valid JSON")?;

        let transcript = json
            .pointer("/results/channels/0/alternatives/0/transcript")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(transcript)
    }

    fn api_base(&self) -> &str {
        self.endpoint
            .strip_suffix("/listen")
            .unwrap_or(&self.endpoint)
    }
}
