//! Offer/answer exchange with the remote signaling endpoint.
//!
//! One blocking POST per session: the local SDP goes up as
//! `{"sdp": ..., "type": "offer"}`, the answer SDP comes back in the
//! response's `sdp` field. Any failure here is session-fatal; the media
//! path cannot proceed without a negotiated session, so there is no retry
//! at this layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SIGNALING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling client init failed: {0}")]
    Init(String),
    #[error("signaling request failed: {0}")]
    Request(String),
    #[error("signaling endpoint returned status {0}")]
    Status(u16),
    #[error("signaling answer is malformed: {0}")]
    MalformedAnswer(String),
}

pub trait SignalingExchange: Send + Sync {
    /// Blocking, single attempt. Returns the remote answer SDP.
    fn exchange(&self, offer_sdp: &str) -> Result<String, SignalingError>;
}

#[derive(Debug, Serialize)]
struct OfferBody<'a> {
    sdp: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnswerBody {
    sdp: String,
}

pub struct HttpSignaling {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSignaling {
    pub fn new(url: impl Into<String>) -> Result<Self, SignalingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SIGNALING_TIMEOUT)
            .build()
            .map_err(|err| SignalingError::Init(err.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    fn parse_answer(body: &[u8]) -> Result<String, SignalingError> {
        let answer: AnswerBody = serde_json::from_slice(body)
            .map_err(|err| SignalingError::MalformedAnswer(err.to_string()))?;
        if answer.sdp.is_empty() {
            return Err(SignalingError::MalformedAnswer(
                "empty sdp field".to_string(),
            ));
        }
        Ok(answer.sdp)
    }
}

impl SignalingExchange for HttpSignaling {
    fn exchange(&self, offer_sdp: &str) -> Result<String, SignalingError> {
        tracing::info!(url = %self.url, "sending offer to signaling endpoint");

        let response = self
            .client
            .post(&self.url)
            .json(&OfferBody {
                sdp: offer_sdp,
                kind: "offer",
            })
            .send()
            .map_err(|err| SignalingError::Request(err.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(SignalingError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .map_err(|err| SignalingError::Request(err.to_string()))?;
        let answer = Self::parse_answer(&body)?;
        tracing::debug!(answer_len = answer.len(), "received answer sdp");
        Ok(answer)
    }
}
