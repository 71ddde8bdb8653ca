//! Decision reactor.
//!
//! Consumes staff decision signals and membership events from a channel
//! and drives lifecycle transitions. The one rule everything here obeys:
//! the status transition commits to the store first, and the follow-up
//! side effects (invites, DMs, role grants, welcome posts) are
//! best-effort afterwards. A failed side effect is recorded on the
//! record or in the report, never rolled back into a failed decision.

use std::sync::Arc;

use chrono::Utc;
use gatehouse_core::partner::{partner_role_name, preset_names};
use gatehouse_core::position::PositionRoles;
use gatehouse_core::record::{
    ApplicationStatus, MessageId, PartnerStatus, UserId,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::discord::{Messenger, RoleManager};
use crate::store::LifecycleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Deny,
}

/// A staff decision on a notification message, with the actor's
/// authorization context carried along so no guild lookup is needed
/// here.
#[derive(Debug, Clone)]
pub struct DecisionSignal {
    pub message_id: MessageId,
    pub actor_id: UserId,
    pub actor_tag: String,
    pub actor_roles: Vec<String>,
    pub actor_can_manage_guild: bool,
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub enum ReactorEvent {
    Decision(DecisionSignal),
    MemberJoined { guild_id: String, user_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectResult {
    pub name: &'static str,
    pub ok: bool,
    pub note: Option<String>,
}

impl EffectResult {
    fn succeeded(name: &'static str) -> Self {
        Self { name, ok: true, note: None }
    }

    fn failed(name: &'static str, note: impl Into<String>) -> Self {
        Self { name, ok: false, note: Some(note.into()) }
    }
}

/// Per-effect outcome of a committed decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffectReport {
    pub effects: Vec<EffectResult>,
}

impl SideEffectReport {
    fn push(&mut self, result: EffectResult) {
        if let Some(note) = &result.note {
            warn!("Side effect {} failed: {}", result.name, note);
        }
        self.effects.push(result);
    }

    pub fn all_ok(&self) -> bool {
        self.effects.iter().all(|e| e.ok)
    }

    pub fn summary(&self) -> String {
        self.effects
            .iter()
            .map(|e| {
                if e.ok {
                    format!("{}: ok", e.name)
                } else {
                    format!("{}: failed ({})", e.name, e.note.as_deref().unwrap_or("unknown"))
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Actor lacks a staff role and cannot manage the guild.
    Unauthorized,
    /// Message id has no lifecycle record.
    UnknownRecord,
    /// Record already left the pending state; nothing re-runs.
    AlreadyResolved(String),
    /// A deny on a record type that has no deny transition.
    Ignored,
    /// Transition committed; side effects ran with these results.
    Applied(SideEffectReport),
}

/// Result of one partner role provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub assigned: bool,
    pub role_name: Option<String>,
    pub failure: Option<String>,
}

#[derive(Clone)]
pub struct ReactorSettings {
    /// Guild where partners live and decisions happen.
    pub main_guild_id: String,
    /// Guild accepted applicants are invited into.
    pub team_guild_id: String,
    pub staff_role_ids: Vec<String>,
    pub team_invite_channel_id: Option<String>,
    pub partner_role_id: Option<String>,
    pub partner_welcome_channel_id: Option<String>,
    pub main_server_invite: Option<String>,
    pub support_email: Option<String>,
    /// User DM'd whenever a partner is accepted.
    pub owner_notify_user_id: Option<String>,
    /// Developer marker role granted when an accepted applicant joins
    /// the team guild.
    pub dev_role_id: Option<String>,
    pub position_roles: Option<PositionRoles>,
}

pub struct Reactor {
    store: Arc<LifecycleStore>,
    roles: Arc<dyn RoleManager>,
    messenger: Arc<dyn Messenger>,
    audit: AuditLogger,
    settings: ReactorSettings,
}

impl Reactor {
    pub fn new(
        store: Arc<LifecycleStore>,
        roles: Arc<dyn RoleManager>,
        messenger: Arc<dyn Messenger>,
        audit: AuditLogger,
        settings: ReactorSettings,
    ) -> Self {
        Self { store, roles, messenger, audit, settings }
    }

    pub fn authorized(&self, signal: &DecisionSignal) -> bool {
        signal.actor_can_manage_guild
            || signal
                .actor_roles
                .iter()
                .any(|r| self.settings.staff_role_ids.contains(r))
    }

    /// Event loop. Runs until every sender is dropped.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ReactorEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ReactorEvent::Decision(signal) => {
                    let outcome = self.handle_decision(&signal).await;
                    info!(
                        "Decision {:?} on {} by {}: {:?}",
                        signal.decision, signal.message_id, signal.actor_tag, outcome
                    );
                }
                ReactorEvent::MemberJoined { guild_id, user_id } => {
                    if let Err(e) = self.member_joined(&guild_id, &user_id).await {
                        warn!("Member-join handling for {} failed: {:#}", user_id, e);
                    }
                }
            }
        }
    }

    pub async fn handle_decision(&self, signal: &DecisionSignal) -> SignalOutcome {
        if !self.authorized(signal) {
            info!(
                "Ignoring decision from {} ({}): not staff",
                signal.actor_tag, signal.actor_id
            );
            return SignalOutcome::Unauthorized;
        }

        if self.store.get_application(&signal.message_id).await.is_some() {
            return match signal.decision {
                Decision::Accept => self.accept_application(signal).await,
                Decision::Deny => self.deny_application(signal).await,
            };
        }
        if self.store.get_partner(&signal.message_id).await.is_some() {
            return match signal.decision {
                Decision::Accept => self.accept_partner(signal).await,
                // Partner requests have no deny transition; staff remove
                // accepted partners through the removal command instead.
                Decision::Deny => SignalOutcome::Ignored,
            };
        }
        SignalOutcome::UnknownRecord
    }

    // =========================================================================
    // Applications
    // =========================================================================

    pub async fn accept_application(&self, signal: &DecisionSignal) -> SignalOutcome {
        let mut transitioned = false;
        let updated = self
            .store
            .update_application(&signal.message_id, |record| {
                if record.status == ApplicationStatus::Pending {
                    record.status = ApplicationStatus::Accepted;
                    record.accepted_by = Some(signal.actor_id.clone());
                    record.accepted_by_tag = Some(signal.actor_tag.clone());
                    transitioned = true;
                }
            })
            .await;
        let Some(record) = updated else {
            return SignalOutcome::UnknownRecord;
        };
        if !transitioned {
            return SignalOutcome::AlreadyResolved(record.status.as_str().to_string());
        }

        // Status is committed from here on.
        let mut report = SideEffectReport::default();

        let invite_code = if record.is_tester() {
            // Testers stay in the main community instead of the team
            // guild, so no single-use invite is minted.
            None
        } else {
            match &self.settings.team_invite_channel_id {
                Some(channel_id) => match self.roles.create_single_use_invite(channel_id).await {
                    Ok(invite) => {
                        report.push(EffectResult::succeeded("invite"));
                        Some(invite)
                    }
                    Err(e) => {
                        report.push(EffectResult::failed("invite", e.to_string()));
                        None
                    }
                },
                None => {
                    report.push(EffectResult::failed("invite", "no invite channel configured"));
                    None
                }
            }
        };

        if let Some(invite) = &invite_code {
            self.store
                .update_application(&signal.message_id, |r| {
                    r.invite_code = Some(invite.code.clone());
                })
                .await;
        }

        let dm = if record.is_tester() {
            let invite_line = self
                .settings
                .main_server_invite
                .as_deref()
                .map(|url| format!("\nJoin us here: {}", url))
                .unwrap_or_default();
            format!(
                "Congratulations {}! Your application for **{}** was accepted. \
                 You'll be pinged in the community server when a test is ready.{}",
                record.name, record.position, invite_line
            )
        } else {
            match &invite_code {
                Some(invite) => format!(
                    "Congratulations {}! Your application for **{}** was accepted. \
                     Join the team server here (single-use, expires in 24h): {}",
                    record.name, record.position, invite.url
                ),
                None => format!(
                    "Congratulations {}! Your application for **{}** was accepted. \
                     A staff member will follow up with a server invite shortly.",
                    record.name, record.position
                ),
            }
        };
        if self.messenger.send_dm(&record.discord_id, &dm).await {
            report.push(EffectResult::succeeded("dm"));
        } else {
            report.push(EffectResult::failed("dm", "delivery failed"));
        }

        self.audit.log(
            "accept_application",
            &signal.actor_id.0,
            &signal.actor_tag,
            Some(record.discord_id.0.clone()),
            json!({ "position": record.position, "effects": report.summary() }),
        );
        SignalOutcome::Applied(report)
    }

    pub async fn deny_application(&self, signal: &DecisionSignal) -> SignalOutcome {
        let mut transitioned = false;
        let updated = self
            .store
            .update_application(&signal.message_id, |record| {
                if record.status == ApplicationStatus::Pending {
                    record.status = ApplicationStatus::Denied;
                    transitioned = true;
                }
            })
            .await;
        let Some(record) = updated else {
            return SignalOutcome::UnknownRecord;
        };
        if !transitioned {
            return SignalOutcome::AlreadyResolved(record.status.as_str().to_string());
        }

        let mut report = SideEffectReport::default();
        let support = self
            .settings
            .support_email
            .as_deref()
            .map(|email| format!(" Questions? Reach us at {}.", email))
            .unwrap_or_default();
        let dm = format!(
            "Hi {}, thank you for applying for **{}**. We won't be moving forward \
             this time, but you're welcome to apply again in the future.{}",
            record.name, record.position, support
        );
        if self.messenger.send_dm(&record.discord_id, &dm).await {
            report.push(EffectResult::succeeded("dm"));
        } else {
            report.push(EffectResult::failed("dm", "delivery failed"));
        }

        self.audit.log(
            "deny_application",
            &signal.actor_id.0,
            &signal.actor_tag,
            Some(record.discord_id.0.clone()),
            json!({ "position": record.position }),
        );
        SignalOutcome::Applied(report)
    }

    // =========================================================================
    // Partners
    // =========================================================================

    pub async fn accept_partner(&self, signal: &DecisionSignal) -> SignalOutcome {
        let mut transitioned = false;
        let updated = self
            .store
            .update_partner(&signal.message_id, |record| {
                if record.status == PartnerStatus::Pending {
                    record.status = PartnerStatus::Accepted;
                    record.accepted_by = Some(signal.actor_id.clone());
                    record.accepted_by_tag = Some(signal.actor_tag.clone());
                    transitioned = true;
                }
            })
            .await;
        let Some(record) = updated else {
            return SignalOutcome::UnknownRecord;
        };
        if !transitioned {
            return SignalOutcome::AlreadyResolved(record.status.as_str().to_string());
        }

        let mut report = SideEffectReport::default();
        let assignment = self
            .assign_partner_roles(&record.requester_user_id, &record.server_name, None)
            .await;
        self.store
            .update_partner(&signal.message_id, |r| {
                r.role_name = assignment.role_name.clone();
                r.pending_role_assignment = !assignment.assigned;
                r.pending_role_reason = assignment.failure.clone();
            })
            .await;
        if assignment.assigned {
            report.push(EffectResult::succeeded("roles"));
        } else {
            report.push(EffectResult::failed(
                "roles",
                assignment
                    .failure
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        if let Some(channel_id) = &self.settings.partner_welcome_channel_id {
            let welcome = format!(
                "Welcome our new partner **{}**! <@{}>",
                record.server_name, record.requester_user_id
            );
            if self.messenger.post(channel_id, &welcome).await {
                report.push(EffectResult::succeeded("welcome"));
            } else {
                report.push(EffectResult::failed("welcome", "post failed"));
            }
        }

        let dm = format!(
            "Your partner request for **{}** was accepted! You can pick a color \
             for your partner role by replying to staff with a preset ({}) or a \
             hex value like #a1b2c3.",
            record.server_name,
            preset_names().join(", ")
        );
        if self.messenger.send_dm(&record.requester_user_id, &dm).await {
            report.push(EffectResult::succeeded("dm"));
        } else {
            report.push(EffectResult::failed("dm", "delivery failed"));
        }

        if let Some(owner) = &self.settings.owner_notify_user_id {
            let note = format!(
                "Partner accepted: **{}** ({} by {}).",
                record.server_name, record.request_id, signal.actor_tag
            );
            self.messenger.send_dm(&UserId::from(owner.as_str()), &note).await;
        }

        self.audit.log(
            "accept_partner",
            &signal.actor_id.0,
            &signal.actor_tag,
            Some(record.request_id.clone()),
            json!({ "server": record.server_name, "effects": report.summary() }),
        );
        SignalOutcome::Applied(report)
    }

    /// Provision the per-server partner role and the shared base role.
    /// Never touches record state; callers decide what to persist.
    pub async fn assign_partner_roles(
        &self,
        user_id: &UserId,
        server_name: &str,
        color: Option<u32>,
    ) -> RoleAssignment {
        let guild_id = &self.settings.main_guild_id;
        let role_name = partner_role_name(server_name);

        let member = match self.roles.fetch_member(guild_id, user_id).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                return RoleAssignment {
                    assigned: false,
                    role_name: Some(role_name),
                    failure: Some("requester is not a member of the guild".to_string()),
                }
            }
            Err(e) => {
                return RoleAssignment {
                    assigned: false,
                    role_name: Some(role_name),
                    failure: Some(format!("member lookup failed: {}", e)),
                }
            }
        };

        let named_role = match self.roles.find_role_by_name(guild_id, &role_name).await {
            Ok(Some(role)) => Ok(role),
            Ok(None) => {
                self.roles
                    .create_role(guild_id, &role_name, color, "Partner role provisioning")
                    .await
            }
            Err(e) => Err(e),
        };
        let named_role = match named_role {
            Ok(role) => role,
            Err(e) => {
                return RoleAssignment {
                    assigned: false,
                    role_name: Some(role_name),
                    failure: Some(format!("role lookup/create failed: {}", e)),
                }
            }
        };

        let mut grant = vec![named_role.id.clone()];
        if let Some(base) = &self.settings.partner_role_id {
            if !member.roles.contains(base) {
                grant.push(base.clone());
            }
        }
        grant.retain(|id| !member.roles.contains(id));
        if !grant.is_empty() {
            if let Err(e) = self
                .roles
                .add_roles(guild_id, user_id, &grant, "Partner accepted")
                .await
            {
                return RoleAssignment {
                    assigned: false,
                    role_name: Some(role_name),
                    failure: Some(format!("role grant failed: {}", e)),
                };
            }
        }

        RoleAssignment {
            assigned: true,
            role_name: Some(named_role.name),
            failure: None,
        }
    }

    /// Re-run role provisioning for an accepted partner whose first
    /// attempt failed.
    pub async fn retry_role_fix(
        &self,
        key: &MessageId,
        actor_id: &UserId,
        actor_tag: &str,
    ) -> Result<RoleAssignment, String> {
        let Some(record) = self.store.get_partner(key).await else {
            return Err("no partner record for that message".to_string());
        };
        if record.status != PartnerStatus::Accepted {
            return Err(format!(
                "partner request is {}, not accepted",
                record.status.as_str()
            ));
        }

        let color = record
            .role_color
            .as_deref()
            .and_then(gatehouse_core::partner::color_to_int);
        let assignment = self
            .assign_partner_roles(&record.requester_user_id, &record.server_name, color)
            .await;
        self.store
            .update_partner(key, |r| {
                r.role_name = assignment.role_name.clone();
                r.pending_role_assignment = !assignment.assigned;
                r.pending_role_reason = assignment.failure.clone();
            })
            .await;

        self.audit.log(
            "partner_role_fix",
            &actor_id.0,
            actor_tag,
            Some(record.request_id.clone()),
            json!({ "assigned": assignment.assigned, "failure": assignment.failure }),
        );
        Ok(assignment)
    }

    /// Remove an accepted partner: commit the status, then strip the
    /// granted roles best-effort.
    pub async fn remove_partner(
        &self,
        key: &MessageId,
        actor_id: &UserId,
        actor_tag: &str,
    ) -> Result<SideEffectReport, String> {
        let mut transitioned = false;
        let updated = self
            .store
            .update_partner(key, |record| {
                if record.status == PartnerStatus::Accepted {
                    record.status = PartnerStatus::Removed;
                    record.removed_by = Some(actor_id.clone());
                    record.removed_at = Some(Utc::now().to_rfc3339());
                    record.pending_role_assignment = false;
                    transitioned = true;
                }
            })
            .await;
        let Some(record) = updated else {
            return Err("no partner record for that message".to_string());
        };
        if !transitioned {
            return Err(format!(
                "partner request is {}, not accepted",
                record.status.as_str()
            ));
        }

        let mut report = SideEffectReport::default();
        let guild_id = &self.settings.main_guild_id;
        let mut strip = Vec::new();
        if let Some(name) = &record.role_name {
            match self.roles.find_role_by_name(guild_id, name).await {
                Ok(Some(role)) => strip.push(role.id),
                Ok(None) => {}
                Err(e) => report.push(EffectResult::failed("role_lookup", e.to_string())),
            }
        }
        if let Some(base) = &self.settings.partner_role_id {
            strip.push(base.clone());
        }
        if strip.is_empty() {
            report.push(EffectResult::succeeded("roles"));
        } else {
            match self
                .roles
                .remove_roles(guild_id, &record.requester_user_id, &strip, "Partner removed")
                .await
            {
                Ok(()) => report.push(EffectResult::succeeded("roles")),
                Err(e) => report.push(EffectResult::failed("roles", e.to_string())),
            }
        }

        self.audit.log(
            "partner_remove",
            &actor_id.0,
            actor_tag,
            Some(record.request_id.clone()),
            json!({ "server": record.server_name }),
        );
        Ok(report)
    }

    // =========================================================================
    // Membership events
    // =========================================================================

    /// A user joined a guild. In the team guild, accepted applicants
    /// get their developer and position roles; a staff-issued instant
    /// invite waiting for the user also redeems here. In the main
    /// guild, an accepted partner still flagged pending gets a role
    /// retry.
    pub async fn member_joined(&self, guild_id: &str, user_id: &UserId) -> anyhow::Result<()> {
        if guild_id == self.settings.team_guild_id {
            // Instant invites target the team guild only; a join
            // anywhere else must leave the stored entry untouched.
            if let Some(invite) = self.store.take_instant_invite(&user_id.0).await? {
                info!(
                    "Member {} joined {}; applying stored invite role {}",
                    user_id, guild_id, invite.role_name
                );
                if let Err(e) = self
                    .roles
                    .add_roles(
                        guild_id,
                        user_id,
                        std::slice::from_ref(&invite.role_id),
                        "Instant invite redemption",
                    )
                    .await
                {
                    warn!("Invite role grant for {} failed: {}", user_id, e);
                }
                let dm = format!(
                    "Welcome aboard! You've been given the **{}** role.",
                    invite.role_name
                );
                self.messenger.send_dm(user_id, &dm).await;
                return Ok(());
            }
            self.team_member_joined(user_id).await;
        } else if guild_id == self.settings.main_guild_id {
            self.retry_partner_for_user(user_id).await;
        }
        Ok(())
    }

    /// Grant the developer marker role and the accepted position's role
    /// to a joining applicant.
    async fn team_member_joined(&self, user_id: &UserId) {
        let Some((_, record)) = self.store.accepted_application_for_user(user_id).await else {
            return;
        };
        // Testers live in the main community and get no team roles.
        if record.is_tester() {
            return;
        }
        let mut grant = Vec::new();
        if let Some(dev) = &self.settings.dev_role_id {
            grant.push(dev.clone());
        }
        if let Some(table) = &self.settings.position_roles {
            if let Some(descriptor) = table.role_for(&record.position) {
                grant.push(descriptor.role_id.clone());
            }
        }
        if grant.is_empty() {
            return;
        }
        info!(
            "Accepted applicant {} joined the team guild; granting {} roles",
            user_id,
            grant.len()
        );
        if let Err(e) = self
            .roles
            .add_roles(
                &self.settings.team_guild_id,
                user_id,
                &grant,
                "Accepted application onboarding",
            )
            .await
        {
            warn!("Onboarding role grant for {} failed: {}", user_id, e);
        }
    }

    async fn retry_partner_for_user(&self, user_id: &UserId) {
        let pending = self.store.partners_pending_role().await;
        for (key, record) in pending {
            if &record.requester_user_id != user_id {
                continue;
            }
            let color = record
                .role_color
                .as_deref()
                .and_then(gatehouse_core::partner::color_to_int);
            let assignment = self
                .assign_partner_roles(&record.requester_user_id, &record.server_name, color)
                .await;
            self.store
                .update_partner(&key, |r| {
                    r.role_name = assignment.role_name.clone();
                    r.pending_role_assignment = !assignment.assigned;
                    r.pending_role_reason = assignment.failure.clone();
                })
                .await;
        }
    }

    /// Startup pass: retry role provisioning for every accepted partner
    /// still flagged pending.
    pub async fn startup_sync(&self) {
        let pending = self.store.partners_pending_role().await;
        if pending.is_empty() {
            return;
        }
        info!("Retrying role provisioning for {} partners", pending.len());
        for (key, record) in pending {
            let color = record
                .role_color
                .as_deref()
                .and_then(gatehouse_core::partner::color_to_int);
            let assignment = self
                .assign_partner_roles(&record.requester_user_id, &record.server_name, color)
                .await;
            self.store
                .update_partner(&key, |r| {
                    r.role_name = assignment.role_name.clone();
                    r.pending_role_assignment = !assignment.assigned;
                    r.pending_role_reason = assignment.failure.clone();
                })
                .await;
            if assignment.assigned {
                info!("Provisioned partner roles for {}", record.request_id);
            } else {
                warn!(
                    "Partner {} still pending roles: {}",
                    record.request_id,
                    assignment.failure.as_deref().unwrap_or("unknown")
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InstantInvite;
    use crate::discord::{Invite, Member, MemberUser, Role};
    use crate::error::GatehouseError;
    use async_trait::async_trait;
    use gatehouse_core::record::{ApplicationRecord, PartnerRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRoles {
        fail_invites: bool,
        fail_grants: bool,
        member_present: bool,
        invites_created: Mutex<usize>,
        granted: Mutex<Vec<Vec<String>>>,
        removed: Mutex<Vec<Vec<String>>>,
        existing_roles: Mutex<Vec<Role>>,
    }

    #[async_trait]
    impl RoleManager for FakeRoles {
        async fn add_roles(
            &self,
            _guild_id: &str,
            _user_id: &UserId,
            role_ids: &[String],
            _reason: &str,
        ) -> Result<(), GatehouseError> {
            if self.fail_grants {
                return Err(GatehouseError::UpstreamTimeout("discord role add"));
            }
            self.granted.lock().unwrap().push(role_ids.to_vec());
            Ok(())
        }

        async fn remove_roles(
            &self,
            _guild_id: &str,
            _user_id: &UserId,
            role_ids: &[String],
            _reason: &str,
        ) -> Result<(), GatehouseError> {
            self.removed.lock().unwrap().push(role_ids.to_vec());
            Ok(())
        }

        async fn create_role(
            &self,
            _guild_id: &str,
            name: &str,
            _color: Option<u32>,
            _reason: &str,
        ) -> Result<Role, GatehouseError> {
            let role = Role {
                id: format!("created-{}", name),
                name: name.to_string(),
            };
            self.existing_roles.lock().unwrap().push(role.clone());
            Ok(role)
        }

        async fn find_role_by_name(
            &self,
            _guild_id: &str,
            name: &str,
        ) -> Result<Option<Role>, GatehouseError> {
            Ok(self
                .existing_roles
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(name))
                .cloned())
        }

        async fn list_roles(&self, _guild_id: &str) -> Result<Vec<Role>, GatehouseError> {
            Ok(self.existing_roles.lock().unwrap().clone())
        }

        async fn set_role_color(
            &self,
            _guild_id: &str,
            _role_id: &str,
            _color: u32,
            _reason: &str,
        ) -> Result<(), GatehouseError> {
            Ok(())
        }

        async fn fetch_member(
            &self,
            _guild_id: &str,
            user_id: &UserId,
        ) -> Result<Option<Member>, GatehouseError> {
            if !self.member_present {
                return Ok(None);
            }
            Ok(Some(Member {
                user: MemberUser {
                    id: user_id.0.clone(),
                    username: "requester".to_string(),
                    bot: false,
                },
                roles: vec![],
            }))
        }

        async fn list_members(&self, _guild_id: &str) -> Result<Vec<Member>, GatehouseError> {
            Ok(vec![])
        }

        async fn create_single_use_invite(
            &self,
            _channel_id: &str,
        ) -> Result<Invite, GatehouseError> {
            if self.fail_invites {
                return Err(GatehouseError::UpstreamTimeout("discord invite create"));
            }
            *self.invites_created.lock().unwrap() += 1;
            Ok(Invite {
                code: "abc123".to_string(),
                url: "https://discord.gg/abc123".to_string(),
            })
        }

        async fn kick(
            &self,
            _guild_id: &str,
            _user_id: &UserId,
            _reason: &str,
        ) -> Result<(), GatehouseError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        fail_dms: bool,
        dms: Mutex<Vec<(String, String)>>,
        posts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_dm(&self, user_id: &UserId, text: &str) -> bool {
            if self.fail_dms {
                return false;
            }
            self.dms
                .lock()
                .unwrap()
                .push((user_id.0.clone(), text.to_string()));
            true
        }

        async fn post(&self, channel_id: &str, text: &str) -> bool {
            self.posts
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            true
        }
    }

    fn settings() -> ReactorSettings {
        ReactorSettings {
            main_guild_id: "g-main".to_string(),
            team_guild_id: "g-team".to_string(),
            staff_role_ids: vec!["staff-1".to_string()],
            team_invite_channel_id: Some("invite-channel".to_string()),
            partner_role_id: Some("partner-base".to_string()),
            partner_welcome_channel_id: Some("welcome".to_string()),
            main_server_invite: Some("https://discord.gg/main".to_string()),
            support_email: Some("team@example.com".to_string()),
            owner_notify_user_id: None,
            dev_role_id: Some("dev-role".to_string()),
            position_roles: None,
        }
    }

    async fn reactor(roles: FakeRoles, messenger: FakeMessenger) -> (Reactor, Arc<LifecycleStore>) {
        let store = Arc::new(LifecycleStore::in_memory().await.unwrap());
        let reactor = Reactor::new(
            store.clone(),
            Arc::new(roles),
            Arc::new(messenger),
            AuditLogger::disabled(),
            settings(),
        );
        (reactor, store)
    }

    fn signal(message_id: &str, decision: Decision) -> DecisionSignal {
        DecisionSignal {
            message_id: MessageId::from(message_id),
            actor_id: UserId::from("99999999999999999"),
            actor_tag: "staff#0".to_string(),
            actor_roles: vec!["staff-1".to_string()],
            actor_can_manage_guild: false,
            decision,
        }
    }

    fn application(position: &str) -> ApplicationRecord {
        ApplicationRecord {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            discord_username: "ada_l".to_string(),
            discord_id: UserId::from("12345678901234567"),
            position: position.to_string(),
            message: "hello".to_string(),
            resume_url: "attachment:resume.pdf".to_string(),
            status: ApplicationStatus::Pending,
            invite_code: None,
            accepted_by: None,
            accepted_by_tag: None,
        }
    }

    fn partner() -> PartnerRecord {
        PartnerRecord {
            request_id: "PR-abc-1234".to_string(),
            requester_username: "gatekeeper".to_string(),
            requester_user_id: UserId::from("22345678901234567"),
            server_name: "Example Server".to_string(),
            server_link: "https://discord.gg/abc".to_string(),
            reason: "events".to_string(),
            member_count_provided: None,
            activity_provided: None,
            member_count_detected: None,
            activity_detected: None,
            status: PartnerStatus::Pending,
            accepted_by: None,
            accepted_by_tag: None,
            role_name: None,
            pending_role_assignment: false,
            pending_role_reason: None,
            role_color: None,
            removed_by: None,
            removed_at: None,
        }
    }

    #[tokio::test]
    async fn test_non_staff_signal_is_rejected_without_mutation() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        let key = MessageId::from("m1");
        store.insert_application(key.clone(), application("Programmer")).await;

        let mut sig = signal("m1", Decision::Accept);
        sig.actor_roles = vec!["random-role".to_string()];
        let outcome = reactor.handle_decision(&sig).await;
        assert_eq!(outcome, SignalOutcome::Unauthorized);
        assert_eq!(
            store.get_application(&key).await.unwrap().status,
            ApplicationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_manage_guild_permission_authorizes_without_staff_role() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        store
            .insert_application(MessageId::from("m1"), application("Programmer"))
            .await;
        let mut sig = signal("m1", Decision::Accept);
        sig.actor_roles = vec![];
        sig.actor_can_manage_guild = true;
        assert!(matches!(
            reactor.handle_decision(&sig).await,
            SignalOutcome::Applied(_)
        ));
    }

    #[tokio::test]
    async fn test_accept_commits_status_even_when_invite_fails() {
        let roles = FakeRoles {
            fail_invites: true,
            ..Default::default()
        };
        let (reactor, store) = reactor(roles, FakeMessenger::default()).await;
        let key = MessageId::from("m1");
        store.insert_application(key.clone(), application("Programmer")).await;

        let outcome = reactor.handle_decision(&signal("m1", Decision::Accept)).await;
        let SignalOutcome::Applied(report) = outcome else {
            panic!("expected Applied");
        };
        assert!(!report.all_ok());

        let record = store.get_application(&key).await.unwrap();
        assert_eq!(record.status, ApplicationStatus::Accepted);
        assert!(record.invite_code.is_none());
        assert_eq!(record.accepted_by, Some(UserId::from("99999999999999999")));
    }

    #[tokio::test]
    async fn test_accept_is_idempotent() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        let key = MessageId::from("m1");
        store.insert_application(key.clone(), application("Programmer")).await;

        let first = reactor.handle_decision(&signal("m1", Decision::Accept)).await;
        assert!(matches!(first, SignalOutcome::Applied(_)));
        let record = store.get_application(&key).await.unwrap();
        assert_eq!(record.invite_code.as_deref(), Some("abc123"));

        let second = reactor.handle_decision(&signal("m1", Decision::Accept)).await;
        assert_eq!(second, SignalOutcome::AlreadyResolved("accepted".to_string()));
    }

    #[tokio::test]
    async fn test_tester_accept_skips_invite_and_points_at_main_server() {
        let roles = FakeRoles::default();
        let messenger = FakeMessenger::default();
        let (reactor, store) = reactor(roles, messenger).await;
        store
            .insert_application(MessageId::from("m1"), application("Game Tester"))
            .await;

        let outcome = reactor.handle_decision(&signal("m1", Decision::Accept)).await;
        assert!(matches!(outcome, SignalOutcome::Applied(_)));
        let record = store.get_application(&MessageId::from("m1")).await.unwrap();
        assert_eq!(record.status, ApplicationStatus::Accepted);
        assert!(record.invite_code.is_none());
    }

    #[tokio::test]
    async fn test_deny_transitions_and_dms() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        let key = MessageId::from("m1");
        store.insert_application(key.clone(), application("Programmer")).await;

        let outcome = reactor.handle_decision(&signal("m1", Decision::Deny)).await;
        let SignalOutcome::Applied(report) = outcome else {
            panic!("expected Applied");
        };
        assert!(report.all_ok());
        assert_eq!(
            store.get_application(&key).await.unwrap().status,
            ApplicationStatus::Denied
        );

        // Deny after deny does not re-run effects
        let again = reactor.handle_decision(&signal("m1", Decision::Deny)).await;
        assert_eq!(again, SignalOutcome::AlreadyResolved("denied".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_message_id() {
        let (reactor, _store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        let outcome = reactor.handle_decision(&signal("nope", Decision::Accept)).await;
        assert_eq!(outcome, SignalOutcome::UnknownRecord);
    }

    #[tokio::test]
    async fn test_partner_deny_is_ignored() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        let key = MessageId::from("p1");
        store.insert_partner(key.clone(), partner()).await;
        let outcome = reactor.handle_decision(&signal("p1", Decision::Deny)).await;
        assert_eq!(outcome, SignalOutcome::Ignored);
        assert_eq!(
            store.get_partner(&key).await.unwrap().status,
            PartnerStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_partner_accept_with_role_failure_flags_pending() {
        let roles = FakeRoles {
            member_present: true,
            fail_grants: true,
            ..Default::default()
        };
        let (reactor, store) = reactor(roles, FakeMessenger::default()).await;
        let key = MessageId::from("p1");
        store.insert_partner(key.clone(), partner()).await;

        let outcome = reactor.handle_decision(&signal("p1", Decision::Accept)).await;
        assert!(matches!(outcome, SignalOutcome::Applied(_)));
        let record = store.get_partner(&key).await.unwrap();
        assert_eq!(record.status, PartnerStatus::Accepted);
        assert!(record.pending_role_assignment);
        assert!(record.pending_role_reason.is_some());
    }

    #[tokio::test]
    async fn test_partner_accept_provisions_named_and_base_roles() {
        let roles = FakeRoles {
            member_present: true,
            ..Default::default()
        };
        let (reactor, store) = reactor(roles, FakeMessenger::default()).await;
        let key = MessageId::from("p1");
        store.insert_partner(key.clone(), partner()).await;

        let outcome = reactor.handle_decision(&signal("p1", Decision::Accept)).await;
        let SignalOutcome::Applied(report) = outcome else {
            panic!("expected Applied");
        };
        assert!(report.all_ok(), "{}", report.summary());
        let record = store.get_partner(&key).await.unwrap();
        assert!(!record.pending_role_assignment);
        assert_eq!(record.role_name.as_deref(), Some("Example Server"));
    }

    #[tokio::test]
    async fn test_retry_role_fix_rejects_non_accepted() {
        let (reactor, store) = reactor(
            FakeRoles {
                member_present: true,
                ..Default::default()
            },
            FakeMessenger::default(),
        )
        .await;
        let key = MessageId::from("p1");
        store.insert_partner(key.clone(), partner()).await;

        let err = reactor
            .retry_role_fix(&key, &UserId::from("9"), "staff#0")
            .await
            .unwrap_err();
        assert!(err.contains("pending"));
    }

    #[tokio::test]
    async fn test_retry_role_fix_clears_pending_flag() {
        let (reactor, store) = reactor(
            FakeRoles {
                member_present: true,
                ..Default::default()
            },
            FakeMessenger::default(),
        )
        .await;
        let key = MessageId::from("p1");
        let mut record = partner();
        record.status = PartnerStatus::Accepted;
        record.pending_role_assignment = true;
        record.pending_role_reason = Some("requester is not a member of the guild".to_string());
        store.insert_partner(key.clone(), record).await;

        let assignment = reactor
            .retry_role_fix(&key, &UserId::from("9"), "staff#0")
            .await
            .unwrap();
        assert!(assignment.assigned);
        let record = store.get_partner(&key).await.unwrap();
        assert!(!record.pending_role_assignment);
        assert!(record.pending_role_reason.is_none());
    }

    #[tokio::test]
    async fn test_remove_partner_commits_and_strips_roles() {
        let roles = FakeRoles {
            member_present: true,
            ..Default::default()
        };
        let (reactor, store) = reactor(roles, FakeMessenger::default()).await;
        let key = MessageId::from("p1");
        let mut record = partner();
        record.status = PartnerStatus::Accepted;
        record.role_name = Some("Example Server".to_string());
        store.insert_partner(key.clone(), record).await;

        let report = reactor
            .remove_partner(&key, &UserId::from("9"), "staff#0")
            .await
            .unwrap();
        assert!(report.all_ok());
        let record = store.get_partner(&key).await.unwrap();
        assert_eq!(record.status, PartnerStatus::Removed);
        assert!(record.removed_by.is_some());

        // Second removal is rejected
        assert!(reactor
            .remove_partner(&key, &UserId::from("9"), "staff#0")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_member_joined_consumes_instant_invite() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        store
            .put_instant_invite(
                "12345678901234567",
                InstantInvite {
                    role_id: "role-1".to_string(),
                    role_name: "Scripter".to_string(),
                    invited_by: "9".to_string(),
                    invited_at: "2025-01-01T00:00:00Z".to_string(),
                },
            )
            .await
            .unwrap();

        reactor
            .member_joined("g-team", &UserId::from("12345678901234567"))
            .await
            .unwrap();
        // Consumed; a second join does nothing
        assert!(store
            .instant_invite("12345678901234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_main_guild_join_leaves_instant_invite_intact() {
        let (reactor, store) = reactor(FakeRoles::default(), FakeMessenger::default()).await;
        store
            .put_instant_invite(
                "12345678901234567",
                InstantInvite {
                    role_id: "role-1".to_string(),
                    role_name: "Scripter".to_string(),
                    invited_by: "9".to_string(),
                    invited_at: "2025-01-01T00:00:00Z".to_string(),
                },
            )
            .await
            .unwrap();

        reactor
            .member_joined("g-main", &UserId::from("12345678901234567"))
            .await
            .unwrap();
        // Still waiting for the team guild join
        assert!(store
            .instant_invite("12345678901234567")
            .await
            .unwrap()
            .is_some());

        reactor
            .member_joined("g-team", &UserId::from("12345678901234567"))
            .await
            .unwrap();
        assert!(store
            .instant_invite("12345678901234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tester_join_gets_no_onboarding_roles() {
        let store = Arc::new(LifecycleStore::in_memory().await.unwrap());
        let mut record = application("Game Tester");
        record.status = ApplicationStatus::Accepted;
        store.insert_application(MessageId::from("m1"), record).await;

        let roles = Arc::new(FakeRoles::default());
        let reactor = Reactor::new(
            store,
            roles.clone(),
            Arc::new(FakeMessenger::default()),
            AuditLogger::disabled(),
            settings(),
        );
        reactor
            .member_joined("g-team", &UserId::from("12345678901234567"))
            .await
            .unwrap();
        assert!(roles.granted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_member_joined_grants_dev_role_to_accepted_applicant() {
        let store = Arc::new(LifecycleStore::in_memory().await.unwrap());
        let mut record = application("Programmer");
        record.status = ApplicationStatus::Accepted;
        store.insert_application(MessageId::from("m1"), record).await;

        let roles = Arc::new(FakeRoles::default());
        let reactor = Reactor::new(
            store.clone(),
            roles.clone(),
            Arc::new(FakeMessenger::default()),
            AuditLogger::disabled(),
            settings(),
        );
        reactor
            .member_joined("g-team", &UserId::from("12345678901234567"))
            .await
            .unwrap();
        let granted = roles.granted.lock().unwrap();
        assert_eq!(granted.as_slice(), &[vec!["dev-role".to_string()]]);
    }

    #[tokio::test]
    async fn test_member_joined_in_main_guild_retries_pending_partner() {
        let store = Arc::new(LifecycleStore::in_memory().await.unwrap());
        let key = MessageId::from("p1");
        let mut record = partner();
        record.status = PartnerStatus::Accepted;
        record.pending_role_assignment = true;
        record.pending_role_reason = Some("requester is not a member of the guild".to_string());
        store.insert_partner(key.clone(), record).await;

        let roles = Arc::new(FakeRoles {
            member_present: true,
            ..Default::default()
        });
        let reactor = Reactor::new(
            store.clone(),
            roles,
            Arc::new(FakeMessenger::default()),
            AuditLogger::disabled(),
            settings(),
        );
        reactor
            .member_joined("g-main", &UserId::from("22345678901234567"))
            .await
            .unwrap();
        assert!(!store.get_partner(&key).await.unwrap().pending_role_assignment);
    }

    #[tokio::test]
    async fn test_startup_sync_retries_pending_partners() {
        let roles = FakeRoles {
            member_present: true,
            ..Default::default()
        };
        let (reactor, store) = reactor(roles, FakeMessenger::default()).await;
        let key = MessageId::from("p1");
        let mut record = partner();
        record.status = PartnerStatus::Accepted;
        record.pending_role_assignment = true;
        store.insert_partner(key.clone(), record).await;

        reactor.startup_sync().await;
        assert!(!store.get_partner(&key).await.unwrap().pending_role_assignment);
    }
}
