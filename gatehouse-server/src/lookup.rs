//! Degraded-mode record resolution.
//!
//! When a staff command references a notification message the store has
//! never seen (typically messages that predate the store), we fetch the
//! message and mine its embed for a user id: footer first, then fields,
//! then description and content. A bounded scan over the guild's text
//! channels backs the case where even the channel is unknown.

use gatehouse_core::record::{MessageId, UserId};
use tracing::info;

use crate::discord::{ChannelMessage, DiscordClient};
use crate::error::GatehouseError;

/// Cap on channels visited during a fallback scan.
const SCAN_CHANNEL_LIMIT: usize = 40;

/// First run of 17 to 20 ASCII digits in the text, the shape of a
/// Discord snowflake.
pub fn extract_snowflake(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let len = i - start;
            if (17..=20).contains(&len) {
                return Some(text[start..i].to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// User id embedded in a notification message.
pub fn user_id_from_message(message: &ChannelMessage) -> Option<UserId> {
    for embed in &message.embeds {
        if let Some(footer) = &embed.footer {
            if let Some(id) = extract_snowflake(&footer.text) {
                return Some(UserId::from(id));
            }
        }
        for field in &embed.fields {
            if let Some(id) = extract_snowflake(&field.value) {
                return Some(UserId::from(id));
            }
        }
        if let Some(description) = &embed.description {
            if let Some(id) = extract_snowflake(description) {
                return Some(UserId::from(id));
            }
        }
    }
    extract_snowflake(&message.content).map(UserId::from)
}

/// Fetch an unknown message id from a known channel and recover the
/// subject user id from its content.
pub async fn recover_user_id(
    client: &DiscordClient,
    channel_id: &str,
    message_id: &MessageId,
) -> Result<Option<UserId>, GatehouseError> {
    let Some(message) = client.fetch_message(channel_id, message_id).await? else {
        return Ok(None);
    };
    Ok(user_id_from_message(&message))
}

/// Scan the guild's text channels for the message. Linear and bounded;
/// only reached when the record store has no entry for the id.
pub async fn scan_guild_for_message(
    client: &DiscordClient,
    guild_id: &str,
    message_id: &MessageId,
) -> Result<Option<UserId>, GatehouseError> {
    info!(
        "Record store has no entry for message {}; scanning guild {} channels",
        message_id, guild_id
    );
    let channels = client.list_text_channels(guild_id).await?;
    for channel in channels.iter().take(SCAN_CHANNEL_LIMIT) {
        match client.fetch_message(&channel.id, message_id).await {
            Ok(Some(message)) => return Ok(user_id_from_message(&message)),
            Ok(None) => continue,
            // A channel we cannot read should not abort the scan.
            Err(_) => continue,
        }
    }
    Ok(None)
}
