//! Notification channel abstraction.
//!
//! Intake forwards every submission as a formatted message and keys the
//! lifecycle record on the message id the channel returns. Two
//! implementations exist: a bot post into a configured channel, and an
//! incoming webhook executed with `?wait=true` so Discord returns the
//! created message. The lifecycle core is indifferent to which one is
//! wired, provided an id comes back within the timeout.

use async_trait::async_trait;
use gatehouse_core::record::MessageId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::discord::DiscordClient;
use crate::error::GatehouseError;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl EmbedField {
    pub fn inline(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline: true,
        }
    }

    pub fn block(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline: false,
        }
    }
}

/// File delivered inline with the notification (resume in bot mode).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub content: String,
    pub embed: Embed,
    pub attachment: Option<Attachment>,
    /// Webhook display name; ignored in bot mode.
    pub username: Option<String>,
}

/// Delivers a notification and returns the message id used as the
/// lifecycle record key.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<MessageId, GatehouseError>;

    /// Whether this channel can carry an inline attachment. Webhook
    /// delivery cannot, so resumes must go through the blob store first.
    fn supports_attachments(&self) -> bool;
}

/// Bot-mode delivery: post into a fixed channel through the bot client.
pub struct BotChannelNotifier {
    client: Arc<DiscordClient>,
    channel_id: String,
}

impl BotChannelNotifier {
    pub fn new(client: Arc<DiscordClient>, channel_id: String) -> Self {
        Self { client, channel_id }
    }
}

#[async_trait]
impl Notifier for BotChannelNotifier {
    async fn send(&self, notification: &Notification) -> Result<MessageId, GatehouseError> {
        self.client
            .send_channel_message(
                &self.channel_id,
                &notification.content,
                Some(&notification.embed),
                notification.attachment.as_ref(),
            )
            .await
    }

    fn supports_attachments(&self) -> bool {
        true
    }
}

/// Incoming-webhook delivery. `wait=true` makes Discord return the
/// created message so we get the id the store keys on.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookMessageResponse {
    id: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let http = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { http, url }
    }

    fn wait_url(url: &str) -> String {
        if url.contains('?') {
            format!("{}&wait=true", url)
        } else {
            format!("{}?wait=true", url)
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<MessageId, GatehouseError> {
        let mut payload = json!({
            "content": notification.content,
            "embeds": [notification.embed],
            "allowed_mentions": { "parse": ["roles"] },
        });
        if let Some(username) = &notification.username {
            payload["username"] = json!(username);
        }

        let response = self
            .http
            .post(Self::wait_url(&self.url))
            .json(&payload)
            .send()
            .await;
        let response = response.map_err(|e| GatehouseError::from_reqwest(e, "discord webhook"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatehouseError::from_status(status, "discord webhook", body));
        }
        let message: WebhookMessageResponse = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord webhook"))?;
        Ok(MessageId::from(message.id))
    }

    fn supports_attachments(&self) -> bool {
        false
    }
}

/// `<@&id> ...` mention prefix for the configured staff roles.
pub fn mention_line(role_ids: &[String], headline: &str) -> String {
    let mentions = role_ids
        .iter()
        .map(|id| format!("<@&{}>", id))
        .collect::<Vec<_>>()
        .join(" ");
    if mentions.is_empty() {
        headline.to_string()
    } else {
        format!("{}\n{}", mentions, headline)
    }
}

fn code_block(text: &str) -> String {
    format!("```\n{}\n```", text)
}

pub fn application_embed(
    submission: &gatehouse_core::validate::ApplicationSubmission,
    resume_url: Option<&str>,
) -> Embed {
    Embed {
        title: "New Team Application".to_string(),
        color: 0x2d8cff,
        fields: vec![
            EmbedField::inline("Name", submission.name.clone()),
            EmbedField::inline("Email", submission.email.clone()),
            EmbedField::block(
                "Discord",
                format!("{} (ID: {})", submission.discord_username, submission.discord_id),
            ),
            EmbedField::inline("Position", submission.position.clone()),
            EmbedField::block(
                "Resume",
                resume_url.unwrap_or("Attached in Discord message"),
            ),
            EmbedField::block("Message", code_block(&submission.message)),
        ],
        footer: Some(EmbedFooter {
            text: format!("Applicant ID: {}", submission.discord_id),
        }),
    }
}

pub fn contact_embed(submission: &gatehouse_core::validate::ContactSubmission) -> Embed {
    Embed {
        title: "New Inquiry".to_string(),
        color: 0x58b2ff,
        fields: vec![
            EmbedField::inline("Name", submission.name.clone()),
            EmbedField::inline("Email", submission.email.clone()),
            EmbedField::inline("Inquiry Type", submission.inquiry_type.clone()),
            EmbedField::inline("Topic", submission.topic.clone()),
            EmbedField::inline(
                "Discord ID",
                submission.discord_id.clone().unwrap_or_else(|| "N/A".to_string()),
            ),
            EmbedField::block("Message", code_block(&submission.message)),
        ],
        footer: None,
    }
}

pub fn partner_embed(
    submission: &gatehouse_core::validate::PartnerSubmission,
    detected: Option<crate::discord::InviteCounts>,
    request_id: &str,
) -> Embed {
    let detected_members = detected
        .and_then(|c| c.member_count)
        .map(|n| n.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let detected_online = detected
        .and_then(|c| c.online_count)
        .map(|n| n.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    Embed {
        title: "Partner Application".to_string(),
        color: 0x7aa2ff,
        fields: vec![
            EmbedField::inline("Server Name", submission.server_name.clone()),
            EmbedField::inline("Requester", submission.username.clone()),
            EmbedField::inline("Requester ID", submission.user_id.clone()),
            EmbedField::block("Server Link", submission.server_link.clone()),
            EmbedField::block("Why Partner", code_block(&submission.reason)),
            EmbedField::inline(
                "Member Count (provided)",
                submission.member_count.clone().unwrap_or_else(|| "N/A".to_string()),
            ),
            EmbedField::inline(
                "Activity (provided)",
                submission.activity.clone().unwrap_or_else(|| "N/A".to_string()),
            ),
            EmbedField::inline("Member Count (detected)", detected_members),
            EmbedField::inline("Activity (detected online)", detected_online),
            EmbedField::block("Partner Request ID", request_id),
        ],
        footer: Some(EmbedFooter {
            text: format!("Requester User ID: {}", submission.user_id),
        }),
    }
}
