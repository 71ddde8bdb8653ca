//! Intake validation: required fields, email syntax, Discord id format
//! and the deny-list profanity filter.
//!
//! These checks are the entry precondition for every lifecycle record.
//! They are intentionally simple pattern checks; no normalization is
//! applied beyond trimming.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required fields")]
    MissingFields,
    #[error("Invalid email")]
    InvalidEmail,
    #[error("Invalid Discord ID (must be 17-20 digits)")]
    InvalidDiscordId,
    #[error("Inappropriate content detected")]
    InappropriateContent,
    #[error("Resume file is required")]
    ResumeMissing,
    #[error("Resume file is too large")]
    ResumeTooLarge,
}

/// Deny-listed substrings. Matching is case-insensitive and fails closed:
/// the first hit rejects the submission.
const DENY_LIST: &[&str] = &[
    "fuck", "shit", "bitch", "nigger", "faggot", "cunt", "retard", "whore", "slut",
];

/// Case-insensitive substring match against the deny list.
pub fn contains_denied_words(text: &str) -> bool {
    let lower = text.to_lowercase();
    DENY_LIST.iter().any(|w| lower.contains(w))
}

/// Syntactic email check: one `@` separating non-empty local and domain
/// parts, a dot inside the domain, no whitespace anywhere.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let mut domain_parts = domain.rsplitn(2, '.');
    let (Some(tld), Some(host)) = (domain_parts.next(), domain_parts.next()) else {
        return false;
    };
    !tld.is_empty() && !host.is_empty()
}

/// A Discord snowflake rendered as decimal is 17-20 digits.
pub fn is_valid_discord_id(id: &str) -> bool {
    (17..=20).contains(&id.len()) && id.chars().all(|c| c.is_ascii_digit())
}

fn clean(value: &str) -> String {
    value.trim().to_string()
}

/// A validated team application, trimmed and ready to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSubmission {
    pub name: String,
    pub email: String,
    pub discord_username: String,
    pub discord_id: String,
    pub position: String,
    pub message: String,
}

impl ApplicationSubmission {
    pub fn validate(
        name: &str,
        email: &str,
        discord_username: &str,
        discord_id: &str,
        position: &str,
        message: &str,
    ) -> Result<Self, ValidationError> {
        let submission = Self {
            name: clean(name),
            email: clean(email),
            discord_username: clean(discord_username),
            discord_id: clean(discord_id),
            position: clean(position),
            message: clean(message),
        };
        if submission.name.is_empty()
            || submission.email.is_empty()
            || submission.discord_username.is_empty()
            || submission.discord_id.is_empty()
            || submission.position.is_empty()
            || submission.message.is_empty()
        {
            return Err(ValidationError::MissingFields);
        }
        if !is_valid_email(&submission.email) {
            return Err(ValidationError::InvalidEmail);
        }
        if !is_valid_discord_id(&submission.discord_id) {
            return Err(ValidationError::InvalidDiscordId);
        }
        if contains_denied_words(&submission.name) || contains_denied_words(&submission.message) {
            return Err(ValidationError::InappropriateContent);
        }
        Ok(submission)
    }
}

/// A validated contact-form submission. Does not create a lifecycle
/// record; it is forwarded only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub discord_id: Option<String>,
    pub topic: String,
    pub message: String,
    pub inquiry_type: String,
}

impl ContactSubmission {
    pub fn validate(
        name: &str,
        email: &str,
        discord_id: &str,
        topic: &str,
        message: &str,
        inquiry_type: &str,
    ) -> Result<Self, ValidationError> {
        let name = clean(name);
        let email = clean(email);
        let discord_id = clean(discord_id);
        let topic = clean(topic);
        let message = clean(message);
        let inquiry_type = {
            let t = clean(inquiry_type);
            if t.is_empty() {
                "General Inquiry".to_string()
            } else {
                t
            }
        };
        if name.is_empty() || email.is_empty() || topic.is_empty() || message.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        if !is_valid_email(&email) {
            return Err(ValidationError::InvalidEmail);
        }
        if !discord_id.is_empty() && !is_valid_discord_id(&discord_id) {
            return Err(ValidationError::InvalidDiscordId);
        }
        if contains_denied_words(&format!("{} {} {}", name, topic, message)) {
            return Err(ValidationError::InappropriateContent);
        }
        Ok(Self {
            name,
            email,
            discord_id: if discord_id.is_empty() {
                None
            } else {
                Some(discord_id)
            },
            topic,
            message,
            inquiry_type,
        })
    }
}

/// A validated partner request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerSubmission {
    pub server_link: String,
    pub username: String,
    pub user_id: String,
    pub reason: String,
    pub server_name: String,
    pub member_count: Option<String>,
    pub activity: Option<String>,
}

impl PartnerSubmission {
    pub fn validate(
        server_link: &str,
        username: &str,
        user_id: &str,
        reason: &str,
        server_name: &str,
        member_count: &str,
        activity: &str,
    ) -> Result<Self, ValidationError> {
        let server_link = clean(server_link);
        let username = clean(username);
        let user_id = clean(user_id);
        let reason = clean(reason);
        let server_name = clean(server_name);
        let member_count = clean(member_count);
        let activity = clean(activity);
        if server_link.is_empty()
            || username.is_empty()
            || user_id.is_empty()
            || reason.is_empty()
            || server_name.is_empty()
        {
            return Err(ValidationError::MissingFields);
        }
        if !is_valid_discord_id(&user_id) {
            return Err(ValidationError::InvalidDiscordId);
        }
        if contains_denied_words(&format!("{} {} {}", username, reason, server_name)) {
            return Err(ValidationError::InappropriateContent);
        }
        Ok(Self {
            server_link,
            username,
            user_id,
            reason,
            server_name,
            member_count: if member_count.is_empty() {
                None
            } else {
                Some(member_count)
            },
            activity: if activity.is_empty() {
                None
            } else {
                Some(activity)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_application() -> Result<ApplicationSubmission, ValidationError> {
        ApplicationSubmission::validate(
            "Ada",
            "ada@example.com",
            "ada_l",
            "12345678901234567",
            "Programmer",
            "I would like to join",
        )
    }

    #[test]
    fn test_valid_application_passes() {
        let submission = valid_application().unwrap();
        assert_eq!(submission.name, "Ada");
        assert_eq!(submission.discord_id, "12345678901234567");
    }

    #[test]
    fn test_fields_are_trimmed() {
        let submission = ApplicationSubmission::validate(
            "  Ada  ",
            " ada@example.com ",
            "ada_l",
            " 12345678901234567 ",
            "Programmer",
            " hi ",
        )
        .unwrap();
        assert_eq!(submission.name, "Ada");
        assert_eq!(submission.email, "ada@example.com");
        assert_eq!(submission.message, "hi");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let result = ApplicationSubmission::validate(
            "",
            "ada@example.com",
            "ada_l",
            "12345678901234567",
            "Programmer",
            "hi",
        );
        assert_eq!(result, Err(ValidationError::MissingFields));
        // Whitespace-only counts as missing
        let result = ApplicationSubmission::validate(
            "Ada",
            "ada@example.com",
            "ada_l",
            "12345678901234567",
            "   ",
            "hi",
        );
        assert_eq!(result, Err(ValidationError::MissingFields));
    }

    #[test]
    fn test_email_syntax() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+c@sub.example.co"));
        assert!(!is_valid_email("ada"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ada@.com"));
        assert!(!is_valid_email("ada@exa mple.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_discord_id_length_bounds() {
        // 16 digits: too short
        assert!(!is_valid_discord_id("1234567890123456"));
        // 17 digits: minimum
        assert!(is_valid_discord_id("12345678901234567"));
        // 20 digits: maximum
        assert!(is_valid_discord_id("12345678901234567890"));
        // 21 digits: too long
        assert!(!is_valid_discord_id("123456789012345678901"));
        // Non-digits rejected
        assert!(!is_valid_discord_id("1234567890123456a"));
        assert!(!is_valid_discord_id("<@123456789012345678>"));
    }

    #[test]
    fn test_profanity_is_case_insensitive() {
        assert!(contains_denied_words("SHIT"));
        assert!(contains_denied_words("ShIt"));
        assert!(contains_denied_words("this is bullshit really"));
        assert!(!contains_denied_words("a perfectly fine message"));
        // Casing variations of clean text stay clean
        assert!(!contains_denied_words("A PERFECTLY FINE MESSAGE"));
    }

    #[test]
    fn test_profanity_rejects_application() {
        let result = ApplicationSubmission::validate(
            "Ada",
            "ada@example.com",
            "ada_l",
            "12345678901234567",
            "Programmer",
            "this is ShIt",
        );
        assert_eq!(result, Err(ValidationError::InappropriateContent));
    }

    #[test]
    fn test_contact_optional_discord_id() {
        let ok = ContactSubmission::validate(
            "Ada",
            "ada@example.com",
            "",
            "Billing",
            "a question",
            "",
        )
        .unwrap();
        assert_eq!(ok.discord_id, None);
        assert_eq!(ok.inquiry_type, "General Inquiry");

        let bad = ContactSubmission::validate(
            "Ada",
            "ada@example.com",
            "123",
            "Billing",
            "a question",
            "",
        );
        assert_eq!(bad, Err(ValidationError::InvalidDiscordId));
    }

    #[test]
    fn test_contact_profanity_spans_all_free_text() {
        // The filter covers name, topic and message together.
        let bad = ContactSubmission::validate(
            "Ada",
            "ada@example.com",
            "",
            "CUNTested topic",
            "a question",
            "",
        );
        assert_eq!(bad, Err(ValidationError::InappropriateContent));
    }

    #[test]
    fn test_partner_required_fields() {
        let ok = PartnerSubmission::validate(
            "https://discord.gg/abc",
            "gatekeeper",
            "12345678901234567",
            "we run events together",
            "Example Server",
            "1200",
            "",
        )
        .unwrap();
        assert_eq!(ok.member_count.as_deref(), Some("1200"));
        assert_eq!(ok.activity, None);

        let bad = PartnerSubmission::validate(
            "https://discord.gg/abc",
            "gatekeeper",
            "12345678901234567",
            "",
            "Example Server",
            "",
            "",
        );
        assert_eq!(bad, Err(ValidationError::MissingFields));
    }
}
