//! Profile records and the chat-input parsing used by the user commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::ProfileStoreError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubProfile {
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackProfile {
    #[serde(default)]
    pub email: String,
}

/// A stored record correlating a GitHub identity with a Slack identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub github: GithubProfile,
    #[serde(default)]
    pub slack: SlackProfile,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(github_user_name: impl Into<String>, slack_email: impl Into<String>) -> Self {
        Self {
            github: GithubProfile {
                user_name: github_user_name.into(),
            },
            slack: SlackProfile {
                email: slack_email.into(),
            },
            ..Self::default()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Filter that selects exactly this profile.
    pub fn identification_filter(&self) -> ProfileFilter {
        ProfileFilter::github_user_name(self.github.user_name.clone())
    }

    /// Filter built from the non-empty identity fields of this record.
    pub fn as_filter(&self) -> ProfileFilter {
        ProfileFilter {
            github_user_name: non_empty(&self.github.user_name),
            slack_email: non_empty(&self.slack.email),
        }
    }

    pub fn validate(&self) -> Result<(), ProfileStoreError> {
        if self.github.user_name.trim().is_empty() {
            return Err(ProfileStoreError::Invalid(
                "github.user_name required".to_string(),
            ));
        }
        if self.slack.email.trim().is_empty() {
            return Err(ProfileStoreError::Invalid("slack.email required".to_string()));
        }
        if !self.slack.email.contains('@') {
            return Err(ProfileStoreError::Invalid(
                "invalid email address".to_string(),
            ));
        }
        Ok(())
    }

    /// Overlays the non-empty fields of `other`; timestamps keep the later value.
    pub fn merge(&self, other: &Profile) -> Profile {
        let mut merged = self.clone();
        if !other.github.user_name.is_empty() {
            merged.github.user_name = other.github.user_name.clone();
        }
        if !other.slack.email.is_empty() {
            merged.slack.email = other.slack.email.clone();
        }
        merged.created_at = later(merged.created_at, other.created_at);
        merged.updated_at = later(merged.updated_at, other.updated_at);
        merged.deleted_at = later(merged.deleted_at, other.deleted_at);
        merged
    }

    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|error| error.to_string())
    }
}

/// Subset-match filter; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFilter {
    pub github_user_name: Option<String>,
    pub slack_email: Option<String>,
}

impl ProfileFilter {
    pub fn github_user_name(user_name: impl Into<String>) -> Self {
        Self {
            github_user_name: Some(user_name.into()),
            slack_email: None,
        }
    }

    pub fn slack_email(email: impl Into<String>) -> Self {
        Self {
            github_user_name: None,
            slack_email: Some(email.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.github_user_name.is_none() && self.slack_email.is_none()
    }

    pub fn matches(&self, profile: &Profile) -> bool {
        let github_ok = self
            .github_user_name
            .as_deref()
            .is_none_or(|expected| profile.github.user_name == expected);
        let slack_ok = self
            .slack_email
            .as_deref()
            .is_none_or(|expected| profile.slack.email == expected);
        github_ok && slack_ok
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn later(left: Option<DateTime<Utc>>, right: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.max(right)),
        (left, right) => left.or(right),
    }
}

const SMART_QUOTES: [char; 4] = ['\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

/// Parses a profile typed into Slack.
///
/// Slack rewrites quotes into typographic quotes, may wrap input in backticks
/// and turns emails into `<mailto:a@b|a@b>` links; all three are undone here.
pub fn parse_profile_from_chat_input(raw: &str) -> Result<Profile, ProfileStoreError> {
    let normalized = raw
        .chars()
        .filter(|ch| *ch != '`')
        .map(|ch| if SMART_QUOTES.contains(&ch) { '"' } else { ch })
        .collect::<String>();
    let mut profile = serde_json::from_str::<Profile>(normalized.trim()).map_err(|error| {
        ProfileStoreError::Invalid(format!("failed to parse json. input: {normalized} ({error})"))
    })?;
    profile.slack.email = sanitize_email(&profile.slack.email);
    Ok(profile)
}

/// Strips Slack's `<mailto:addr|addr>` link decoration from an email.
pub fn sanitize_email(email: &str) -> String {
    let trimmed = email.trim();
    if let Some(link) = trimmed
        .strip_prefix("<mailto:")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return match link.split_once('|') {
            Some((_, label)) => label.to_string(),
            None => link.to_string(),
        };
    }
    trimmed.to_string()
}
