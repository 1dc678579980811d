//! Streaming voice transcription with a hard wall-clock cutoff.
//!
//! Audio is relayed to the vendor as a stream; the server enforces a
//! 300-second ceiling regardless of what the vendor does. Hitting the
//! ceiling returns the partial transcript with a truncation marker
//! rather than an error, so the caller can keep what was heard.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::config::TranscriptionConfig;

/// Transcription failures.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// No API key configured.
    #[error("transcription vendor is not configured")]
    Disabled,

    /// Vendor call failed or timed out.
    #[error("transcription vendor call failed: {0}")]
    Vendor(String),

    /// Vendor response failed validation.
    #[error("transcription response failed validation: {0}")]
    Schema(String),
}

/// Result of a transcription run.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Recognized text (possibly partial).
    pub text: String,
    /// Seconds of audio processed.
    pub duration_seconds: u32,
    /// True when the server-side cutoff truncated the stream.
    pub truncated: bool,
}

/// Credits charged for an audio duration: `credits_per_minute` per
/// started minute.
pub fn credit_cost(duration_seconds: u32, credits_per_minute: i64) -> i64 {
    let started_minutes = i64::from(duration_seconds.div_ceil(60)).max(1);
    started_minutes * credits_per_minute
}

/// HTTP client for the transcription vendor.
#[derive(Debug, Clone)]
pub struct TranscribeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_duration: Duration,
}

impl TranscribeClient {
    /// Build the client from config.
    pub fn new(config: &TranscriptionConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            max_duration: Duration::from_secs(u64::from(config.max_duration_seconds)),
        }
    }

    /// Transcribe audio at `audio_url`, streaming vendor results and
    /// enforcing the wall-clock ceiling.
    pub async fn transcribe(
        &self,
        audio_url: &str,
        duration_seconds: u32,
    ) -> Result<Transcript, TranscribeError> {
        let key = self.api_key.as_deref().ok_or(TranscribeError::Disabled)?;

        #[derive(serde::Serialize)]
        struct Request<'a> {
            audio_url: &'a str,
            stream: bool,
        }

        let response = self
            .http
            .post(format!("{}/v1/transcribe", self.base_url))
            .bearer_auth(key)
            .json(&Request {
                audio_url,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| TranscribeError::Vendor(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscribeError::Vendor(format!(
                "vendor returned status {status}"
            )));
        }

        // Newline-delimited JSON segments; accumulate until the stream
        // ends or the wall clock runs out.
        let mut text = String::new();
        let mut truncated = false;
        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        let deadline = tokio::time::Instant::now() + self.max_duration;

        loop {
            let chunk = tokio::time::timeout_at(deadline, stream.next()).await;
            match chunk {
                Err(_) => {
                    warn!("transcription hit the wall-clock cutoff");
                    truncated = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(TranscribeError::Vendor(e.to_string())),
                Ok(Some(Ok(bytes))) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        append_segment(&mut text, &line)?;
                    }
                }
            }
        }
        if !truncated && !buffer.is_empty() {
            append_segment(&mut text, &buffer)?;
        }

        Ok(Transcript {
            text: text.trim().to_owned(),
            duration_seconds,
            truncated,
        })
    }
}

/// One vendor stream segment.
#[derive(Debug, Deserialize)]
struct Segment {
    text: String,
}

fn append_segment(text: &mut String, line: &[u8]) -> Result<(), TranscribeError> {
    let line = std::str::from_utf8(line)
        .map_err(|e| TranscribeError::Schema(e.to_string()))?
        .trim();
    if line.is_empty() {
        return Ok(());
    }
    let segment: Segment =
        serde_json::from_str(line).map_err(|e| TranscribeError::Schema(e.to_string()))?;
    if !text.is_empty() {
        text.push(' ');
    }
    text.push_str(&segment.text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_cost_per_started_minute() {
        assert_eq!(credit_cost(1, 5), 5);
        assert_eq!(credit_cost(59, 5), 5);
        assert_eq!(credit_cost(60, 5), 5);
        assert_eq!(credit_cost(61, 5), 10);
        assert_eq!(credit_cost(300, 5), 25);
    }

    #[test]
    fn test_credit_cost_floors_at_one_minute() {
        assert_eq!(credit_cost(0, 5), 5);
    }

    #[test]
    fn test_append_segment_joins_with_spaces() {
        let mut text = String::new();
        append_segment(&mut text, br#"{"text":"hello"}"#).expect("segment");
        append_segment(&mut text, br#"{"text":"world"}"#).expect("segment");
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_append_segment_rejects_bad_json() {
        let mut text = String::new();
        assert!(append_segment(&mut text, b"not json").is_err());
    }
}
