//! Partner-specific helpers: role naming, invite-link parsing and role
//! color selection.

/// Derive the per-partner role name from the partner's server name.
///
/// Strips characters Discord rejects in role names, collapses runs of
/// whitespace and caps the length below Discord's 100-character limit.
pub fn partner_role_name(server_name: &str) -> String {
    let cleaned: String = server_name
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || matches!(c, ' ' | '_' | '!' | '-' | '(' | ')' | '[' | ']' | '.')
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "Partner Server".to_string();
    }
    collapsed.chars().take(95).collect()
}

/// Extract the invite code from a Discord invite link or bare code.
///
/// Accepts `https://discord.gg/<code>`, `https://discord.com/invite/<code>`,
/// `invite/<code>` and a bare code. Returns None for anything else.
pub fn parse_invite_code(value: &str) -> Option<String> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let rest = raw.splitn(2, "//").nth(1)?;
        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let host = segments.next()?.to_lowercase();
        let first = segments.next()?;
        if host.contains("discord.gg") {
            return Some(first.to_string());
        }
        if host.contains("discord.com") && first == "invite" {
            return segments.next().map(|s| s.to_string());
        }
        return None;
    }
    let code = raw.strip_prefix("invite/").unwrap_or(raw);
    Some(code.to_string())
}

/// Named color presets accepted partners can pick over DM.
pub const COLOR_PRESETS: &[(&str, &str)] = &[
    ("red", "#ef4444"),
    ("orange", "#f97316"),
    ("yellow", "#eab308"),
    ("green", "#22c55e"),
    ("cyan", "#06b6d4"),
    ("blue", "#3b82f6"),
    ("purple", "#8b5cf6"),
    ("pink", "#ec4899"),
    ("white", "#f8fafc"),
    ("gray", "#94a3b8"),
];

pub fn preset_names() -> Vec<&'static str> {
    COLOR_PRESETS.iter().map(|(name, _)| *name).collect()
}

/// Resolve a preset name or hex string to a `#rrggbb` color.
pub fn parse_role_color(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }
    if let Some((_, hex)) = COLOR_PRESETS.iter().find(|(name, _)| *name == value) {
        return Some(hex.to_string());
    }
    let hex = if let Some(stripped) = value.strip_prefix('#') {
        stripped.to_string()
    } else {
        value
    };
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("#{}", hex))
    } else {
        None
    }
}

/// Parse a `#rrggbb` color into the integer form the role API expects.
pub fn color_to_int(hex: &str) -> Option<u32> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}
