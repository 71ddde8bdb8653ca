//! Position-to-role mapping.
//!
//! The intake form offers free-text-ish position names; accepted
//! applicants are granted a concrete role in the team server. The
//! mapping is an explicit table built from configuration and validated
//! at startup against the role manager's known roles, so a typo'd role
//! id fails fast instead of silently no-op-ing at accept time.

use std::collections::HashMap;

/// A role grant target: the configured role id plus the human label used
/// in welcome messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDescriptor {
    pub role_id: String,
    pub label: String,
}

/// Position name (lowercased) -> role descriptor table.
#[derive(Debug, Clone)]
pub struct PositionRoles {
    entries: HashMap<String, RoleDescriptor>,
}

/// Role ids for each team discipline, as configured.
#[derive(Debug, Clone)]
pub struct DisciplineRoleIds {
    pub scripter: String,
    pub vfx: String,
    pub sfx: String,
    pub modeler: String,
    pub animator: String,
    pub gui: String,
}

impl PositionRoles {
    pub fn new(ids: &DisciplineRoleIds) -> Self {
        let mut entries = HashMap::new();
        let mut add = |positions: &[&str], role_id: &str, label: &str| {
            for position in positions {
                entries.insert(
                    position.to_string(),
                    RoleDescriptor {
                        role_id: role_id.to_string(),
                        label: label.to_string(),
                    },
                );
            }
        };
        add(&["programmer", "scripter"], &ids.scripter, "Scripter");
        add(&["vfx"], &ids.vfx, "VFX Artist");
        add(&["sfx"], &ids.sfx, "SFX Artist");
        add(&["modeler"], &ids.modeler, "Modeler");
        add(&["animator"], &ids.animator, "Animator");
        add(&["gui artist", "ui/ux"], &ids.gui, "GUI Artist");
        Self { entries }
    }

    /// Look up the role grant for a submitted position name.
    pub fn role_for(&self, position: &str) -> Option<&RoleDescriptor> {
        self.entries.get(&position.trim().to_lowercase())
    }

    /// Welcome-message label for a position; falls back to the submitted
    /// text when the position has no mapping.
    pub fn label_for(&self, position: &str) -> String {
        self.role_for(position)
            .map(|d| d.label.clone())
            .unwrap_or_else(|| position.to_string())
    }

    /// All distinct role ids the table grants.
    pub fn role_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.values().map(|d| d.role_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Check every mapped role id against the set of roles the role
    /// manager actually knows about. Returns the ids that are missing.
    pub fn validate_against(&self, known_role_ids: &[String]) -> Result<(), Vec<String>> {
        let missing: Vec<String> = self
            .role_ids()
            .into_iter()
            .filter(|id| !known_role_ids.iter().any(|k| k == id))
            .map(|id| id.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

/// Map a role name to the roster skill column, if the role marks a
/// development discipline.
pub fn role_name_to_skill(role_name: &str) -> Option<&'static str> {
    let name = role_name.to_lowercase();
    if name.contains("script") || name.contains("program") {
        Some("Scripting")
    } else if name.contains("vfx") {
        Some("VFX")
    } else if name.contains("sfx") {
        Some("SFX")
    } else if name.contains("anim") {
        Some("Animation")
    } else if name.contains("gui") || name.contains("ui") {
        Some("GUI / UI")
    } else if name.contains("map") {
        Some("Map Making")
    } else if name.contains("model") {
        Some("Modeling")
    } else if name.contains("graphic") {
        Some("Graphic Arts")
    } else if name.contains("hr") {
        Some("HR")
    } else {
        None
    }
}
