//! Optional AI coprocessor integration.
//!
//! The host periodically probes a local Ollama instance and, when one is
//! up, asks it for short in-character "handler" sitreps to broadcast.
//! The coprocessor is strictly a collaborator: if it is down or slow the
//! feature degrades to canned lines and the request path never fails.

use crate::error::ProtocolError;
use crate::protocol::CoprocessorStatus;
use crate::types::Task;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const FALLBACK_LINES: &[&str] = &[
    "Handler here. Comms are degraded but the board is live. Keep moving.",
    "No word from upstairs. Work the list, verify your kills.",
    "Static on the uplink. Targets stand. Execute.",
    "Channel's cold. Assume every deadline is real.",
];

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Polls the coprocessor and produces handler sitreps.
pub struct CoprocessorMonitor {
    client: reqwest::Client,
    base_url: String,
    status: CoprocessorStatus,
    model: Option<String>,
}

impl CoprocessorMonitor {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            status: CoprocessorStatus {
                active: false,
                kind: "OLLAMA".to_string(),
                model_count: 0,
            },
            model: None,
        }
    }

    pub fn status(&self) -> CoprocessorStatus {
        self.status.clone()
    }

    /// Probe the coprocessor. Returns the new status only when it
    /// changed, so callers broadcast on transitions rather than every
    /// tick.
    pub async fn probe(&mut self) -> Option<CoprocessorStatus> {
        let was_active = self.status.active;
        let was_count = self.status.model_count;

        match self.fetch_tags().await {
            Ok(models) => {
                self.status.active = !models.is_empty();
                self.status.model_count = models.len();
                self.model = models.into_iter().next();
            }
            Err(err) => {
                debug!("coprocessor probe failed: {}", err);
                self.status.active = false;
                self.status.model_count = 0;
                self.model = None;
            }
        }

        if self.status.active != was_active || self.status.model_count != was_count {
            Some(self.status.clone())
        } else {
            None
        }
    }

    async fn fetch_tags(&self) -> Result<Vec<String>, ProtocolError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProtocolError::upstream_unavailable)?;
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(ProtocolError::upstream_unavailable)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Produce one handler sitrep line for the current board. The handler
    /// stays quiet over an empty board. Falls back to a canned line when
    /// the coprocessor is down, and only about half the time so the
    /// channel does not feel scripted.
    pub async fn sitrep(&self, tasks: &[Task]) -> Option<(String, bool)> {
        if !tasks.iter().any(|t| t.is_live()) {
            return None;
        }
        if !self.status.active || self.model.is_none() {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(0.5) {
                let line = FALLBACK_LINES.choose(&mut rng)?;
                return Some(((*line).to_string(), false));
            }
            return None;
        }

        match self.generate(tasks).await {
            Ok(text) => Some((text, true)),
            Err(err) => {
                debug!("coprocessor sitrep failed: {}", err);
                let line = FALLBACK_LINES.choose(&mut rand::thread_rng())?;
                Some(((*line).to_string(), false))
            }
        }
    }

    async fn generate(&self, tasks: &[Task]) -> Result<String, ProtocolError> {
        let live: Vec<&str> = tasks
            .iter()
            .filter(|t| t.is_live())
            .map(|t| t.text.as_str())
            .take(10)
            .collect();
        let prompt = format!(
            "You are a terse intelligence handler addressing a field operative. \
             Open targets: {}. In at most two short sentences, give a cold, \
             motivating status check. No pleasantries.",
            live.join("; ")
        );
        let model = self.model.as_deref().unwrap_or_default();
        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await
            .map_err(ProtocolError::upstream_unavailable)?;
        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(ProtocolError::upstream_unavailable)?;
        Ok(body.response.trim().to_string())
    }
}
