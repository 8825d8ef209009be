//! Identity translation between GitHub and Slack user namespaces.
//!
//! Profiles correlate a GitHub username with a Slack email and live in a
//! [`ProfileStore`]. The [`IdentityResolver`] turns a GitHub username into a
//! Slack [`ChatUser`] through a cached copy of the Slack directory.

mod profile;
mod resolver;
mod sqlite;
mod store;

pub use profile::{
    parse_profile_from_chat_input, sanitize_email, GithubProfile, Profile, ProfileFilter,
    SlackProfile,
};
pub use resolver::{ChatDirectory, ChatUser, IdentityError, IdentityResolver};
pub use sqlite::SqliteProfileStore;
pub use store::{
    DeleteProfilesOutcome, DeleteProfilesRequest, FindProfilesQuery, InMemoryProfileStore,
    ProfileStore, ProfileStoreError, ProfileStoreResult, UpdateProfileRequest,
};
