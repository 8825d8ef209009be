//! Profile store contract and the in-memory backend.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::profile::{Profile, ProfileFilter};

/// Result type for profile store operations.
pub type ProfileStoreResult<T> = Result<T, ProfileStoreError>;

/// Errors returned by profile store implementations.
#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("profile for github user '{0}' already exists")]
    AlreadyExists(String),
    #[error("no profile matched the filter")]
    NotFound,
    #[error("unsafe deletion process. if you want to delete all, enable the all flag")]
    UnsafeDelete,
    #[error("{0}")]
    Invalid(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct FindProfilesQuery {
    pub filter: ProfileFilter,
    /// Zero means unlimited.
    pub limit: usize,
    pub include_deleted: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateProfileRequest {
    pub filter: ProfileFilter,
    pub profile: Profile,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteProfilesRequest {
    pub filter: ProfileFilter,
    pub all: bool,
    pub hard: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteProfilesOutcome {
    pub soft_deleted: usize,
    pub hard_deleted: usize,
}

/// Async store contract used by the resolver and the user commands.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn add_profile(&self, profile: Profile) -> ProfileStoreResult<Profile>;
    async fn update_profile(&self, request: UpdateProfileRequest) -> ProfileStoreResult<Profile>;
    async fn find_profiles(&self, query: &FindProfilesQuery) -> ProfileStoreResult<Vec<Profile>>;
    async fn delete_profiles(
        &self,
        request: &DeleteProfilesRequest,
    ) -> ProfileStoreResult<DeleteProfilesOutcome>;
}

pub(crate) fn ensure_safe_delete(request: &DeleteProfilesRequest) -> ProfileStoreResult<()> {
    if request.filter.is_empty() && !request.all {
        return Err(ProfileStoreError::UnsafeDelete);
    }
    Ok(())
}

/// Process-local store, used in tests and when no database path is configured.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<Vec<Profile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<Profile>) -> Self {
        Self {
            profiles: RwLock::new(profiles),
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn add_profile(&self, mut profile: Profile) -> ProfileStoreResult<Profile> {
        let mut profiles = self.profiles.write().await;
        if profiles
            .iter()
            .any(|existing| existing.github.user_name == profile.github.user_name)
        {
            return Err(ProfileStoreError::AlreadyExists(profile.github.user_name));
        }
        let now = Utc::now();
        profile.created_at = Some(now);
        profile.updated_at = Some(now);
        profiles.push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(
        &self,
        mut request: UpdateProfileRequest,
    ) -> ProfileStoreResult<Profile> {
        let mut profiles = self.profiles.write().await;
        let index = profiles
            .iter()
            .position(|profile| request.filter.matches(profile))
            .ok_or(ProfileStoreError::NotFound)?;
        let renamed_onto_other = profiles.iter().enumerate().any(|(other, existing)| {
            other != index && existing.github.user_name == request.profile.github.user_name
        });
        if renamed_onto_other {
            return Err(ProfileStoreError::AlreadyExists(
                request.profile.github.user_name,
            ));
        }
        request.profile.updated_at = Some(Utc::now());
        profiles[index] = request.profile.clone();
        Ok(request.profile)
    }

    async fn find_profiles(&self, query: &FindProfilesQuery) -> ProfileStoreResult<Vec<Profile>> {
        let profiles = self.profiles.read().await;
        let limit = if query.limit == 0 {
            usize::MAX
        } else {
            query.limit
        };
        Ok(profiles
            .iter()
            .filter(|profile| query.include_deleted || !profile.is_deleted())
            .filter(|profile| query.filter.matches(profile))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_profiles(
        &self,
        request: &DeleteProfilesRequest,
    ) -> ProfileStoreResult<DeleteProfilesOutcome> {
        ensure_safe_delete(request)?;
        let mut profiles = self.profiles.write().await;
        let mut outcome = DeleteProfilesOutcome::default();
        if request.hard {
            let before = profiles.len();
            profiles.retain(|profile| !request.filter.matches(profile));
            outcome.hard_deleted = before - profiles.len();
        } else {
            let now = Utc::now();
            for profile in profiles
                .iter_mut()
                .filter(|profile| !profile.is_deleted() && request.filter.matches(profile))
            {
                profile.deleted_at = Some(now);
                outcome.soft_deleted += 1;
            }
        }
        Ok(outcome)
    }
}
