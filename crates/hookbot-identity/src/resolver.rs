//! GitHub username to Slack user resolution over a cached directory.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::profile::ProfileFilter;
use crate::store::{FindProfilesQuery, ProfileStore, ProfileStoreError};

/// A Slack workspace member as returned by the directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub image_48: Option<String>,
}

/// Source of the full chat directory; no incremental fetch is assumed.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn list_users(&self) -> anyhow::Result<Vec<ChatUser>>;
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user not found: {subject}")]
    UserNotFound { subject: String },
    #[error("chat directory fetch failed: {0:#}")]
    DirectoryFetchFailed(anyhow::Error),
    #[error("profile lookup failed: {0}")]
    ProfileLookup(#[from] ProfileStoreError),
}

impl IdentityError {
    pub fn is_user_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound { .. })
    }
}

/// Resolves identities across GitHub and Slack.
///
/// The directory cache is `None` until the first lookup and afterwards always
/// holds one complete fetch. A single async lock covers the populate check,
/// the fetch and the scan, so refreshes never race each other and a miss
/// triggers at most one forced refresh.
pub struct IdentityResolver {
    profiles: Arc<dyn ProfileStore>,
    directory: Arc<dyn ChatDirectory>,
    cache: Mutex<Option<Vec<ChatUser>>>,
}

impl IdentityResolver {
    pub fn new(profiles: Arc<dyn ProfileStore>, directory: Arc<dyn ChatDirectory>) -> Self {
        Self {
            profiles,
            directory,
            cache: Mutex::new(None),
        }
    }

    pub async fn resolve_by_source_username(
        &self,
        github_user_name: &str,
    ) -> Result<ChatUser, IdentityError> {
        let profiles = self
            .profiles
            .find_profiles(&FindProfilesQuery {
                filter: ProfileFilter::github_user_name(github_user_name),
                limit: 1,
                include_deleted: false,
            })
            .await?;
        let Some(profile) = profiles.into_iter().next() else {
            return Err(IdentityError::UserNotFound {
                subject: format!("github user '{github_user_name}'"),
            });
        };
        self.resolve_by_email(&profile.slack.email, false).await
    }

    pub async fn resolve_by_email(
        &self,
        email: &str,
        force_refresh: bool,
    ) -> Result<ChatUser, IdentityError> {
        let mut cache = self.cache.lock().await;
        let mut refresh = force_refresh;
        loop {
            if refresh || cache.is_none() {
                let users = self
                    .directory
                    .list_users()
                    .await
                    .map_err(IdentityError::DirectoryFetchFailed)?;
                *cache = Some(users);
            }

            let found = cache
                .as_deref()
                .and_then(|users| users.iter().find(|user| user.email == email));
            if let Some(user) = found {
                return Ok(user.clone());
            }
            if refresh {
                return Err(IdentityError::UserNotFound {
                    subject: format!("slack email '{email}'"),
                });
            }
            refresh = true;
        }
    }

    /// Number of cached directory entries, `None` before the first fetch.
    pub async fn cached_user_count(&self) -> Option<usize> {
        self.cache.lock().await.as_ref().map(Vec::len)
    }
}
