//! Developer roster message.
//!
//! One pinned message in the roster channel lists the team's developers
//! grouped by skill, derived from their roles. Refresh rebuilds the
//! text from live membership and edits the stored message in place,
//! posting a fresh one only when none is recorded or the recorded one
//! is gone.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use crate::db::RosterMessage;
use crate::discord::{DiscordClient, Member, Role};
use crate::store::LifecycleStore;
use gatehouse_core::position::role_name_to_skill;

const SKILL_ORDER: [&str; 9] = [
    "Scripting",
    "VFX",
    "SFX",
    "Animation",
    "GUI / UI",
    "Map Making",
    "Modeling",
    "Graphic Arts",
    "HR",
];

/// Roster text from a membership snapshot. Pure so it can be tested
/// without a live guild.
pub fn build_roster_text(members: &[Member], roles: &[Role], dev_role_id: &str) -> String {
    let role_names: BTreeMap<&str, &str> = roles
        .iter()
        .map(|r| (r.id.as_str(), r.name.as_str()))
        .collect();

    let mut by_skill: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for member in members {
        if member.user.bot || !member.roles.iter().any(|r| r == dev_role_id) {
            continue;
        }
        let mut skills: Vec<&str> = member
            .roles
            .iter()
            .filter_map(|id| role_names.get(id.as_str()))
            .filter_map(|name| role_name_to_skill(name))
            .collect();
        skills.sort_unstable();
        skills.dedup();
        for skill in skills {
            by_skill
                .entry(skill)
                .or_default()
                .push(member.user.username.clone());
        }
    }

    let mut out = String::from("**Development Team Roster**\n");
    let mut total = 0usize;
    for skill in SKILL_ORDER {
        let Some(names) = by_skill.get(skill) else { continue };
        let mut names = names.clone();
        names.sort_unstable();
        total += names.len();
        out.push_str(&format!("\n__{}__ ({})\n", skill, names.len()));
        for name in names {
            out.push_str(&format!("- {}\n", name));
        }
    }
    if total == 0 {
        out.push_str("\n_No developers found._\n");
    }
    out
}

/// Rebuild the roster and update the stored message.
pub async fn refresh_roster(
    client: &DiscordClient,
    store: &LifecycleStore,
    guild_id: &str,
    channel_id: &str,
    dev_role_id: &str,
) -> Result<String> {
    use crate::discord::RoleManager;

    let members = client.list_members(guild_id).await?;
    let roles = client.list_roles(guild_id).await?;
    let text = build_roster_text(&members, &roles, dev_role_id);

    if let Some(existing) = store.roster_message(guild_id).await? {
        if client
            .edit_message(&existing.channel_id, &existing.message_id, &text)
            .await
            .is_ok()
        {
            info!("Edited roster message {} in place", existing.message_id);
            return Ok(existing.message_id);
        }
        // Message deleted out from under us; fall through and repost.
    }

    let message_id = client
        .send_channel_message(channel_id, &text, None, None)
        .await?;
    store
        .put_roster_message(
            guild_id,
            RosterMessage {
                channel_id: channel_id.to_string(),
                message_id: message_id.0.clone(),
            },
        )
        .await?;
    info!("Posted new roster message {}", message_id);
    Ok(message_id.0)
}
