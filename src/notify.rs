//! Completion notices.
//!
//! A status request may register a target URL. Once a cycle closes with nothing
//! left staged, a short JSON message is POSTed there so whoever asked learns
//! that the region indices have caught up.

use crate::state::CycleState;
use crate::{Error, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct Notice<'a> {
    text: &'a str,
}

pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn send(&self, target: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(target)
            .json(&Notice { text })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transient(format!(
                "notice to {} returned {}",
                target, status
            )));
        }
        Ok(())
    }

    /// Send a completion notice; failures are only logged.
    pub async fn notify_finished(&self, target: &str, state: &CycleState) {
        let text = completion_text(state);
        match self.send(target, &text).await {
            Ok(()) => tracing::info!("sent notice to {}", target),
            Err(e) => tracing::warn!("failed to send notice to {}: {}", target, e),
        }
    }
}

pub fn completion_text(state: &CycleState) -> String {
    let mut text = format!(
        "Region indexer is idle after {} cycle(s). Last cycle indexed {} file(s)",
        state.cycles, state.indexed
    );
    if let Some(took) = &state.cycle_took {
        text.push_str(&format!(" in {}", took));
    }
    text.push('.');
    if !state.errors.is_empty() {
        text.push_str(&format!(" {} error(s) recorded.", state.errors.len()));
    }
    text
}
