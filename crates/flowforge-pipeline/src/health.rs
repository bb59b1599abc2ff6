//! Post-deployment health probe
//!
//! Opens an anonymous runtime session against the deployed widget, lets the
//! conversation settle, then scans the bot's opening messages for known
//! broken-deployment phrasing. The probe is advisory: its result is attached
//! to the final pipeline result and never blocks, and its own transport
//! failures are classified as unknown health rather than propagated -
//! a broken probe must never masquerade as a broken deployment.

use crate::remote::{MessageAuthor, SessionRuntime, bounded};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One textual signature of a broken deployment
#[derive(Debug, Clone, Copy)]
pub struct BrokenSignature {
    /// Lower-cased needle searched in bot messages
    pub pattern: &'static str,
    /// Classified reason reported on a match
    pub reason: &'static str,
}

/// Fixed signature table, most specific first.
pub const BROKEN_SIGNATURES: &[BrokenSignature] = &[
    BrokenSignature {
        pattern: "experiencing technical difficulties",
        reason: "technical_difficulty",
    },
    BrokenSignature {
        pattern: "something went wrong",
        reason: "technical_difficulty",
    },
    BrokenSignature {
        pattern: "unable to process your request",
        reason: "technical_difficulty",
    },
    BrokenSignature {
        pattern: "transferring you to an agent",
        reason: "immediate_agent_transfer",
    },
    BrokenSignature {
        pattern: "connect you with a human",
        reason: "immediate_agent_transfer",
    },
    BrokenSignature {
        pattern: "this conversation has ended",
        reason: "immediate_session_end",
    },
    BrokenSignature {
        pattern: "session has expired",
        reason: "immediate_session_end",
    },
];

/// Probe verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// At least one clean bot message
    Healthy,
    /// A bot message matched a broken signature
    Unhealthy {
        /// Classified reason
        reason: String,
        /// The offending message text
        offending_text: String,
    },
    /// Probe could not produce a verdict
    Unknown {
        /// Why the verdict is unknown
        reason: String,
    },
}

impl HealthStatus {
    /// Whether the deployment looked healthy
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Probe result attached to the pipeline outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Verdict
    pub status: HealthStatus,
    /// Bot messages observed in the snapshot
    pub bot_messages_seen: usize,
    /// When the probe ran
    pub probed_at: DateTime<Utc>,
}

impl HealthReport {
    /// Report an unknown verdict
    #[must_use]
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unknown {
                reason: reason.into(),
            },
            bot_messages_seen: 0,
            probed_at: Utc::now(),
        }
    }
}

/// Synthetic-conversation health probe
#[derive(Debug, Clone)]
pub struct HealthProbe {
    settle_interval: Duration,
    call_timeout: Duration,
}

impl HealthProbe {
    /// Create a probe with the given intervals
    #[inline]
    #[must_use]
    pub fn new(settle_interval: Duration, call_timeout: Duration) -> Self {
        Self {
            settle_interval,
            call_timeout,
        }
    }

    /// Probe a deployed widget. Infallible: transport problems yield an
    /// unknown verdict instead of an error.
    pub async fn probe(&self, runtime: &dyn SessionRuntime, widget_id: &str) -> HealthReport {
        match self.try_probe(runtime, widget_id).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, "health probe failed, verdict unknown");
                HealthReport::unknown(format!("probe transport failure: {err}"))
            }
        }
    }

    async fn try_probe(
        &self,
        runtime: &dyn SessionRuntime,
        widget_id: &str,
    ) -> Result<HealthReport, crate::remote::RemoteError> {
        let session_id = bounded(self.call_timeout, runtime.create_session(widget_id)).await?;
        bounded(self.call_timeout, runtime.start_conversation(&session_id)).await?;

        tokio::time::sleep(self.settle_interval).await;

        let snapshot = bounded(self.call_timeout, runtime.snapshot(&session_id)).await?;
        if let Err(err) = bounded(self.call_timeout, runtime.end_conversation(&session_id)).await {
            tracing::debug!(error = %err, "failed to end probe conversation");
        }

        let bot_messages: Vec<&str> = snapshot
            .messages
            .iter()
            .filter(|m| m.author == MessageAuthor::Bot)
            .map(|m| m.text.as_str())
            .collect();

        for text in &bot_messages {
            let lowered = text.to_lowercase();
            if let Some(signature) = BROKEN_SIGNATURES
                .iter()
                .find(|s| lowered.contains(s.pattern))
            {
                return Ok(HealthReport {
                    status: HealthStatus::Unhealthy {
                        reason: signature.reason.to_string(),
                        offending_text: (*text).to_string(),
                    },
                    bot_messages_seen: bot_messages.len(),
                    probed_at: Utc::now(),
                });
            }
        }

        if bot_messages.is_empty() {
            // Absence of traffic is not evidence of health.
            return Ok(HealthReport {
                status: HealthStatus::Unknown {
                    reason: "no bot messages after settle interval".to_string(),
                },
                bot_messages_seen: 0,
                probed_at: Utc::now(),
            });
        }

        Ok(HealthReport {
            status: HealthStatus::Healthy,
            bot_messages_seen: bot_messages.len(),
            probed_at: Utc::now(),
        })
    }
}
