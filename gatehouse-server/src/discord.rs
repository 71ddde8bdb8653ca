//! Discord REST client.
//!
//! Thin typed wrapper over the v10 HTTP API, plus the collaborator
//! traits the reactor depends on. Every call carries an explicit
//! timeout; status codes are mapped into the shared error taxonomy so
//! rate limits and auth failures stay distinguishable.

use async_trait::async_trait;
use gatehouse_core::record::{MessageId, UserId};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::GatehouseError;
use crate::notify::{Attachment, Embed};

const API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);
/// Public invite metadata is a nice-to-have; keep its budget short.
const INVITE_COUNTS_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: MemberUser,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone)]
pub struct Invite {
    pub code: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct InviteCounts {
    pub member_count: Option<u64>,
    pub online_count: Option<u64>,
}

/// A fetched channel message, reduced to the parts the degraded-mode
/// lookup scans.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<FetchedEmbed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchedEmbed {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FetchedEmbedField>,
    #[serde(default)]
    pub footer: Option<FetchedEmbedFooter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchedEmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchedEmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildChannel {
    pub id: String,
    /// Discord channel type; 0 is a guild text channel.
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Deserialize)]
struct MessageIdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DmChannelResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InviteResponse {
    code: String,
}

#[derive(Debug, Deserialize)]
struct InviteCountsResponse {
    approximate_member_count: Option<u64>,
    approximate_presence_count: Option<u64>,
}

/// Role and membership operations the reactor drives. Every call is
/// best-effort from the reactor's point of view; the trait exists so
/// reactor tests can substitute a scripted implementation.
#[async_trait]
pub trait RoleManager: Send + Sync {
    async fn add_roles(
        &self,
        guild_id: &str,
        user_id: &UserId,
        role_ids: &[String],
        reason: &str,
    ) -> Result<(), GatehouseError>;

    async fn remove_roles(
        &self,
        guild_id: &str,
        user_id: &UserId,
        role_ids: &[String],
        reason: &str,
    ) -> Result<(), GatehouseError>;

    async fn create_role(
        &self,
        guild_id: &str,
        name: &str,
        color: Option<u32>,
        reason: &str,
    ) -> Result<Role, GatehouseError>;

    async fn find_role_by_name(
        &self,
        guild_id: &str,
        name: &str,
    ) -> Result<Option<Role>, GatehouseError>;

    async fn list_roles(&self, guild_id: &str) -> Result<Vec<Role>, GatehouseError>;

    async fn set_role_color(
        &self,
        guild_id: &str,
        role_id: &str,
        color: u32,
        reason: &str,
    ) -> Result<(), GatehouseError>;

    /// None when the user is not a member of the guild.
    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &UserId,
    ) -> Result<Option<Member>, GatehouseError>;

    async fn list_members(&self, guild_id: &str) -> Result<Vec<Member>, GatehouseError>;

    async fn create_single_use_invite(&self, channel_id: &str)
        -> Result<Invite, GatehouseError>;

    async fn kick(
        &self,
        guild_id: &str,
        user_id: &UserId,
        reason: &str,
    ) -> Result<(), GatehouseError>;
}

/// Outbound text delivery. Both operations swallow errors: delivery
/// failure must never propagate past the reactor boundary.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// DM a user. Returns whether the send succeeded.
    async fn send_dm(&self, user_id: &UserId, text: &str) -> bool;

    /// Post a plain message to a channel. Returns whether the send
    /// succeeded.
    async fn post(&self, channel_id: &str, text: &str) -> bool;
}

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    token: String,
    api_base: String,
}

impl DiscordClient {
    pub fn new(token: String) -> Self {
        Self::with_base(token, API_BASE.to_string())
    }

    /// Override the API base, for tests pointed at a local server.
    pub fn with_base(token: String, api_base: String) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            token,
            api_base,
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn check(
        response: Result<reqwest::Response, reqwest::Error>,
        upstream: &'static str,
    ) -> Result<reqwest::Response, GatehouseError> {
        let response = response.map_err(|e| GatehouseError::from_reqwest(e, upstream))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatehouseError::from_status(status, upstream, body))
    }

    /// Send a message (content + embed, optional file) to a channel and
    /// return the message id the lifecycle store keys on.
    pub async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
        embed: Option<&Embed>,
        attachment: Option<&Attachment>,
    ) -> Result<MessageId, GatehouseError> {
        let mut payload = json!({ "content": content });
        if let Some(embed) = embed {
            payload["embeds"] = json!([embed]);
        }

        let url = self.url(&format!("/channels/{}/messages", channel_id));
        let request = self.http.post(&url).header("Authorization", self.auth());
        let response = if let Some(file) = attachment {
            payload["attachments"] =
                json!([{ "id": 0, "filename": file.filename }]);
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.filename.clone())
                .mime_str(&file.content_type)
                .map_err(|e| GatehouseError::Internal(anyhow::Error::new(e)))?;
            let form = reqwest::multipart::Form::new()
                .text("payload_json", payload.to_string())
                .part("files[0]", part);
            request.multipart(form).send().await
        } else {
            request.json(&payload).send().await
        };

        let response = Self::check(response, "discord channel send").await?;
        let body: MessageIdResponse = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord channel send"))?;
        Ok(MessageId::from(body.id))
    }

    pub async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &MessageId,
    ) -> Result<Option<ChannelMessage>, GatehouseError> {
        let url = self.url(&format!("/channels/{}/messages/{}", channel_id, message_id));
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord message fetch"))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(Ok(response), "discord message fetch").await?;
        let message: ChannelMessage = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord message fetch"))?;
        Ok(Some(message))
    }

    pub async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), GatehouseError> {
        let url = self.url(&format!("/channels/{}/messages/{}", channel_id, message_id));
        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await;
        Self::check(response, "discord message edit").await?;
        Ok(())
    }

    pub async fn list_text_channels(
        &self,
        guild_id: &str,
    ) -> Result<Vec<GuildChannel>, GatehouseError> {
        let url = self.url(&format!("/guilds/{}/channels", guild_id));
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await;
        let response = Self::check(response, "discord channel list").await?;
        let channels: Vec<GuildChannel> = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord channel list"))?;
        Ok(channels.into_iter().filter(|c| c.kind == 0).collect())
    }

    /// Public invite metadata (`with_counts=true`); no auth required.
    /// Best-effort: any failure is reported as None by the caller.
    pub async fn invite_counts(
        &self,
        code: &str,
    ) -> Result<InviteCounts, GatehouseError> {
        let url = self.url(&format!("/invites/{}?with_counts=true", code));
        let response = self
            .http
            .get(&url)
            .timeout(INVITE_COUNTS_TIMEOUT)
            .send()
            .await;
        let response = Self::check(response, "discord invite lookup").await?;
        let counts: InviteCountsResponse = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord invite lookup"))?;
        Ok(InviteCounts {
            member_count: counts.approximate_member_count,
            online_count: counts.approximate_presence_count,
        })
    }
}

#[async_trait]
impl RoleManager for DiscordClient {
    async fn add_roles(
        &self,
        guild_id: &str,
        user_id: &UserId,
        role_ids: &[String],
        reason: &str,
    ) -> Result<(), GatehouseError> {
        // The API grants one role per request.
        for role_id in role_ids {
            let url = self.url(&format!(
                "/guilds/{}/members/{}/roles/{}",
                guild_id, user_id, role_id
            ));
            let response = self
                .http
                .put(&url)
                .header("Authorization", self.auth())
                .header("X-Audit-Log-Reason", reason)
                .send()
                .await;
            Self::check(response, "discord role add").await?;
        }
        Ok(())
    }

    async fn remove_roles(
        &self,
        guild_id: &str,
        user_id: &UserId,
        role_ids: &[String],
        reason: &str,
    ) -> Result<(), GatehouseError> {
        for role_id in role_ids {
            let url = self.url(&format!(
                "/guilds/{}/members/{}/roles/{}",
                guild_id, user_id, role_id
            ));
            let response = self
                .http
                .delete(&url)
                .header("Authorization", self.auth())
                .header("X-Audit-Log-Reason", reason)
                .send()
                .await;
            Self::check(response, "discord role remove").await?;
        }
        Ok(())
    }

    async fn create_role(
        &self,
        guild_id: &str,
        name: &str,
        color: Option<u32>,
        reason: &str,
    ) -> Result<Role, GatehouseError> {
        let url = self.url(&format!("/guilds/{}/roles", guild_id));
        let mut payload = json!({
            "name": name,
            "permissions": "0",
            "hoist": false,
            "mentionable": false,
        });
        if let Some(color) = color {
            payload["color"] = json!(color);
        }
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .header("X-Audit-Log-Reason", reason)
            .json(&payload)
            .send()
            .await;
        let response = Self::check(response, "discord role create").await?;
        let role: Role = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord role create"))?;
        info!("Created role {} ({}) in guild {}", role.name, role.id, guild_id);
        Ok(role)
    }

    async fn find_role_by_name(
        &self,
        guild_id: &str,
        name: &str,
    ) -> Result<Option<Role>, GatehouseError> {
        let roles = self.list_roles(guild_id).await?;
        Ok(roles
            .into_iter()
            .find(|r| r.name.to_lowercase() == name.to_lowercase()))
    }

    async fn list_roles(&self, guild_id: &str) -> Result<Vec<Role>, GatehouseError> {
        let url = self.url(&format!("/guilds/{}/roles", guild_id));
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await;
        let response = Self::check(response, "discord role list").await?;
        response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord role list"))
    }

    async fn set_role_color(
        &self,
        guild_id: &str,
        role_id: &str,
        color: u32,
        reason: &str,
    ) -> Result<(), GatehouseError> {
        let url = self.url(&format!("/guilds/{}/roles/{}", guild_id, role_id));
        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.auth())
            .header("X-Audit-Log-Reason", reason)
            .json(&json!({ "color": color }))
            .send()
            .await;
        Self::check(response, "discord role color").await?;
        Ok(())
    }

    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &UserId,
    ) -> Result<Option<Member>, GatehouseError> {
        let url = self.url(&format!("/guilds/{}/members/{}", guild_id, user_id));
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord member fetch"))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(Ok(response), "discord member fetch").await?;
        let member: Member = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord member fetch"))?;
        Ok(Some(member))
    }

    async fn list_members(&self, guild_id: &str) -> Result<Vec<Member>, GatehouseError> {
        let url = self.url(&format!("/guilds/{}/members?limit=1000", guild_id));
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await;
        let response = Self::check(response, "discord member list").await?;
        response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord member list"))
    }

    async fn create_single_use_invite(
        &self,
        channel_id: &str,
    ) -> Result<Invite, GatehouseError> {
        let url = self.url(&format!("/channels/{}/invites", channel_id));
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "max_uses": 1, "max_age": 86400, "unique": true }))
            .send()
            .await;
        let response = Self::check(response, "discord invite create").await?;
        let invite: InviteResponse = response
            .json()
            .await
            .map_err(|e| GatehouseError::from_reqwest(e, "discord invite create"))?;
        Ok(Invite {
            url: format!("https://discord.gg/{}", invite.code),
            code: invite.code,
        })
    }

    async fn kick(
        &self,
        guild_id: &str,
        user_id: &UserId,
        reason: &str,
    ) -> Result<(), GatehouseError> {
        let url = self.url(&format!("/guilds/{}/members/{}", guild_id, user_id));
        let response = self
            .http
            .delete(&url)
            .header("Authorization", self.auth())
            .header("X-Audit-Log-Reason", reason)
            .send()
            .await;
        Self::check(response, "discord kick").await?;
        Ok(())
    }
}

/// Collaborator used when no bot token is configured: every role
/// operation reports the missing configuration and every send fails
/// quietly. Intake still works through webhooks in this mode.
pub struct Disconnected;

#[async_trait]
impl RoleManager for Disconnected {
    async fn add_roles(
        &self,
        _guild_id: &str,
        _user_id: &UserId,
        _role_ids: &[String],
        _reason: &str,
    ) -> Result<(), GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn remove_roles(
        &self,
        _guild_id: &str,
        _user_id: &UserId,
        _role_ids: &[String],
        _reason: &str,
    ) -> Result<(), GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn create_role(
        &self,
        _guild_id: &str,
        _name: &str,
        _color: Option<u32>,
        _reason: &str,
    ) -> Result<Role, GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn find_role_by_name(
        &self,
        _guild_id: &str,
        _name: &str,
    ) -> Result<Option<Role>, GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn list_roles(&self, _guild_id: &str) -> Result<Vec<Role>, GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn set_role_color(
        &self,
        _guild_id: &str,
        _role_id: &str,
        _color: u32,
        _reason: &str,
    ) -> Result<(), GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn fetch_member(
        &self,
        _guild_id: &str,
        _user_id: &UserId,
    ) -> Result<Option<Member>, GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn list_members(&self, _guild_id: &str) -> Result<Vec<Member>, GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn create_single_use_invite(
        &self,
        _channel_id: &str,
    ) -> Result<Invite, GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }

    async fn kick(
        &self,
        _guild_id: &str,
        _user_id: &UserId,
        _reason: &str,
    ) -> Result<(), GatehouseError> {
        Err(GatehouseError::NotConfigured("bot token"))
    }
}

#[async_trait]
impl Messenger for Disconnected {
    async fn send_dm(&self, user_id: &UserId, _text: &str) -> bool {
        warn!("No bot token configured; cannot DM {}", user_id);
        false
    }

    async fn post(&self, channel_id: &str, _text: &str) -> bool {
        warn!("No bot token configured; cannot post to {}", channel_id);
        false
    }
}

#[async_trait]
impl Messenger for DiscordClient {
    async fn send_dm(&self, user_id: &UserId, text: &str) -> bool {
        let result: Result<(), GatehouseError> = async {
            let url = self.url("/users/@me/channels");
            let response = self
                .http
                .post(&url)
                .header("Authorization", self.auth())
                .json(&json!({ "recipient_id": user_id.0 }))
                .send()
                .await;
            let response = Self::check(response, "discord dm channel").await?;
            let channel: DmChannelResponse = response
                .json()
                .await
                .map_err(|e| GatehouseError::from_reqwest(e, "discord dm channel"))?;
            self.send_channel_message(&channel.id, text, None, None)
                .await?;
            Ok(())
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("DM to {} failed: {}", user_id, e);
                false
            }
        }
    }

    async fn post(&self, channel_id: &str, text: &str) -> bool {
        match self.send_channel_message(channel_id, text, None, None).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Channel post to {} failed: {}", channel_id, e);
                false
            }
        }
    }
}
