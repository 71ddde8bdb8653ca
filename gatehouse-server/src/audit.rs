//! Staff action audit trail.
//!
//! Every staff decision and command lands as one JSON line in the
//! audit file, and as a best-effort post to the audit channel when one
//! is configured. Events flow through an unbounded channel to a
//! background writer task so callers never block on disk or network.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::discord::DiscordClient;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub action: String,
    pub actor_id: String,
    pub actor_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl AuditEvent {
    fn channel_line(&self) -> String {
        let target = self
            .target
            .as_deref()
            .map(|t| format!(" | target: {}", t))
            .unwrap_or_default();
        let detail = if self.detail.is_null() {
            String::new()
        } else {
            format!(" | {}", self.detail)
        };
        format!(
            "`{}` **{}** by {} ({}){}{}",
            self.timestamp, self.action, self.actor_tag, self.actor_id, target, detail
        )
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    tx: Option<mpsc::UnboundedSender<AuditEvent>>,
}

impl AuditLogger {
    /// Starts the writer task. Dropping every clone of the returned
    /// logger shuts the task down once queued events are flushed.
    pub fn start(
        path: String,
        channel: Option<(Arc<DiscordClient>, String)>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_task(path, channel, rx));
        (Self { tx: Some(tx) }, handle)
    }

    /// Logger that drops everything, for tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn log(&self, action: &str, actor_id: &str, actor_tag: &str, target: Option<String>, detail: Value) {
        let Some(tx) = &self.tx else { return };
        let event = AuditEvent {
            timestamp: Utc::now().to_rfc3339(),
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            actor_tag: actor_tag.to_string(),
            target,
            detail,
        };
        if tx.send(event).is_err() {
            warn!("Audit writer has shut down; dropping event");
        }
    }
}

async fn writer_task(
    path: String,
    channel: Option<(Arc<DiscordClient>, String)>,
    mut rx: mpsc::UnboundedReceiver<AuditEvent>,
) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            error!("Failed to open audit log {}: {}", path, e);
            None
        }
    };

    while let Some(event) = rx.recv().await {
        if let Some(f) = &mut file {
            match serde_json::to_string(&event) {
                Ok(mut line) => {
                    line.push('\n');
                    if let Err(e) = f.write_all(line.as_bytes()).await {
                        error!("Failed to append audit event: {}", e);
                    }
                }
                Err(e) => error!("Failed to serialize audit event: {}", e),
            }
        }
        if let Some((client, channel_id)) = &channel {
            // Channel delivery is advisory; the file is the record.
            use crate::discord::Messenger;
            let _ = client.post(channel_id, &event.channel_line()).await;
        }
    }

    if let Some(f) = &mut file {
        let _ = f.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_without_empty_optionals() {
        let event = AuditEvent {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            action: "accept_application".to_string(),
            actor_id: "1".to_string(),
            actor_tag: "staff#0".to_string(),
            target: None,
            detail: Value::Null,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("target").is_none());
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn test_channel_line_includes_target_and_detail() {
        let event = AuditEvent {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            action: "partnerremove".to_string(),
            actor_id: "1".to_string(),
            actor_tag: "staff#0".to_string(),
            target: Some("PR-abc-1234".to_string()),
            detail: json!({"reason": "inactive"}),
        };
        let line = event.channel_line();
        assert!(line.contains("partnerremove"));
        assert!(line.contains("PR-abc-1234"));
        assert!(line.contains("inactive"));
    }

    #[tokio::test]
    async fn test_disabled_logger_is_a_no_op() {
        let logger = AuditLogger::disabled();
        logger.log("ping", "1", "staff#0", None, Value::Null);
    }
}
