//! SQLite-backed `ProfileStore` implementation with durable persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};

use crate::profile::{GithubProfile, Profile, ProfileFilter, SlackProfile};
use crate::store::{
    ensure_safe_delete, DeleteProfilesOutcome, DeleteProfilesRequest, FindProfilesQuery,
    ProfileStore, ProfileStoreError, ProfileStoreResult, UpdateProfileRequest,
};

/// Persistent SQLite profile store.
#[derive(Debug)]
pub struct SqliteProfileStore {
    db_path: PathBuf,
}

impl SqliteProfileStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> ProfileStoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> ProfileStoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> ProfileStoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            github_user_name TEXT PRIMARY KEY,
            slack_email TEXT NOT NULL,
            created_at TEXT NULL,
            updated_at TEXT NULL,
            deleted_at TEXT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_profiles_slack_email ON profiles (slack_email);
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn add_profile(&self, mut profile: Profile) -> ProfileStoreResult<Profile> {
        let now = Utc::now();
        profile.created_at = Some(now);
        profile.updated_at = Some(now);

        let connection = self.open_connection()?;
        let inserted = connection.execute(
            r#"
            INSERT OR IGNORE INTO profiles (
                github_user_name, slack_email, created_at, updated_at, deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                profile.github.user_name,
                profile.slack.email,
                option_timestamp_to_db(profile.created_at),
                option_timestamp_to_db(profile.updated_at),
                option_timestamp_to_db(profile.deleted_at),
            ],
        )?;
        if inserted == 0 {
            return Err(ProfileStoreError::AlreadyExists(profile.github.user_name));
        }
        Ok(profile)
    }

    async fn update_profile(
        &self,
        mut request: UpdateProfileRequest,
    ) -> ProfileStoreResult<Profile> {
        request.profile.updated_at = Some(Utc::now());
        let profile = request.profile;

        let (where_clause, mut values) = filter_clause(&request.filter);
        let mut bound = vec![
            Some(profile.github.user_name.clone()),
            Some(profile.slack.email.clone()),
            option_timestamp_to_db(profile.created_at),
            option_timestamp_to_db(profile.updated_at),
            option_timestamp_to_db(profile.deleted_at),
        ];
        bound.extend(values.drain(..).map(Some));

        let connection = self.open_connection()?;
        let updated = connection
            .execute(
                &format!(
                    "UPDATE profiles SET github_user_name = ?, slack_email = ?, created_at = ?, \
                     updated_at = ?, deleted_at = ? {where_clause}"
                ),
                params_from_iter(bound.iter()),
            )
            .map_err(|error| match error {
                rusqlite::Error::SqliteFailure(failure, _)
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    ProfileStoreError::AlreadyExists(profile.github.user_name.clone())
                }
                other => ProfileStoreError::from(other),
            })?;
        if updated == 0 {
            return Err(ProfileStoreError::NotFound);
        }
        Ok(profile)
    }

    async fn find_profiles(&self, query: &FindProfilesQuery) -> ProfileStoreResult<Vec<Profile>> {
        let (mut where_clause, values) = filter_clause(&query.filter);
        if !query.include_deleted {
            where_clause = if where_clause.is_empty() {
                "WHERE deleted_at IS NULL".to_string()
            } else {
                format!("{where_clause} AND deleted_at IS NULL")
            };
        }
        let limit_clause = if query.limit > 0 {
            format!("LIMIT {}", query.limit)
        } else {
            String::new()
        };

        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT github_user_name, slack_email, created_at, updated_at, deleted_at \
             FROM profiles {where_clause} ORDER BY github_user_name {limit_clause}"
        ))?;
        let rows = statement.query_map(params_from_iter(values.iter()), read_row)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(decode_row(row?)?);
        }
        Ok(profiles)
    }

    async fn delete_profiles(
        &self,
        request: &DeleteProfilesRequest,
    ) -> ProfileStoreResult<DeleteProfilesOutcome> {
        ensure_safe_delete(request)?;
        let (where_clause, values) = filter_clause(&request.filter);
        let connection = self.open_connection()?;

        if request.hard {
            let removed = connection.execute(
                &format!("DELETE FROM profiles {where_clause}"),
                params_from_iter(values.iter()),
            )?;
            return Ok(DeleteProfilesOutcome {
                hard_deleted: removed,
                ..DeleteProfilesOutcome::default()
            });
        }

        let not_deleted = if where_clause.is_empty() {
            "WHERE deleted_at IS NULL".to_string()
        } else {
            format!("{where_clause} AND deleted_at IS NULL")
        };
        let mut bound = vec![Utc::now().to_rfc3339()];
        bound.extend(values);
        let modified = connection.execute(
            &format!("UPDATE profiles SET deleted_at = ? {not_deleted}"),
            params_from_iter(bound.iter()),
        )?;
        Ok(DeleteProfilesOutcome {
            soft_deleted: modified,
            ..DeleteProfilesOutcome::default()
        })
    }
}

fn filter_clause(filter: &ProfileFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(user_name) = &filter.github_user_name {
        clauses.push("github_user_name = ?");
        values.push(user_name.clone());
    }
    if let Some(email) = &filter.slack_email {
        clauses.push("slack_email = ?");
        values.push(email.clone());
    }
    if clauses.is_empty() {
        return (String::new(), values);
    }
    (format!("WHERE {}", clauses.join(" AND ")), values)
}

type RawProfileRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawProfileRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_row(raw: RawProfileRow) -> ProfileStoreResult<Profile> {
    let (user_name, email, created_at, updated_at, deleted_at) = raw;
    Ok(Profile {
        github: GithubProfile { user_name },
        slack: SlackProfile { email },
        created_at: option_timestamp_from_db("created_at", created_at)?,
        updated_at: option_timestamp_from_db("updated_at", updated_at)?,
        deleted_at: option_timestamp_from_db("deleted_at", deleted_at)?,
    })
}

fn option_timestamp_to_db(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|timestamp| timestamp.to_rfc3339())
}

fn option_timestamp_from_db(
    field: &'static str,
    value: Option<String>,
) -> ProfileStoreResult<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| ProfileStoreError::InvalidPersistedValue { field, value: raw })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::SqliteProfileStore;
    use crate::profile::{Profile, ProfileFilter};
    use crate::store::{
        DeleteProfilesRequest, FindProfilesQuery, ProfileStore, ProfileStoreError,
        UpdateProfileRequest,
    };

    #[tokio::test]
    async fn integration_sqlite_store_persists_across_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("profiles.sqlite");
        {
            let store = SqliteProfileStore::new(&path).expect("open");
            store
                .add_profile(Profile::new("octo", "octo@example.com"))
                .await
                .expect("add");
        }

        let reopened = SqliteProfileStore::new(&path).expect("reopen");
        let found = reopened
            .find_profiles(&FindProfilesQuery {
                filter: ProfileFilter::github_user_name("octo"),
                limit: 1,
                include_deleted: false,
            })
            .await
            .expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slack.email, "octo@example.com");
        assert!(found[0].created_at.is_some());
    }

    #[tokio::test]
    async fn functional_sqlite_update_and_soft_then_hard_delete() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteProfileStore::new(temp.path().join("profiles.sqlite")).expect("open");
        let added = store
            .add_profile(Profile::new("octo", "octo@example.com"))
            .await
            .expect("add");
        store
            .add_profile(Profile::new("hubot", "hubot@example.com"))
            .await
            .expect("add second");

        let duplicate = store
            .add_profile(Profile::new("octo", "again@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(duplicate, ProfileStoreError::AlreadyExists(_)));

        store
            .update_profile(UpdateProfileRequest {
                filter: added.identification_filter(),
                profile: added.merge(&Profile::new("", "new@example.com")),
            })
            .await
            .expect("update");
        let by_email = store
            .find_profiles(&FindProfilesQuery {
                filter: ProfileFilter::slack_email("new@example.com"),
                ..FindProfilesQuery::default()
            })
            .await
            .expect("find by email");
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].github.user_name, "octo");

        let soft = store
            .delete_profiles(&DeleteProfilesRequest {
                filter: ProfileFilter::github_user_name("octo"),
                ..DeleteProfilesRequest::default()
            })
            .await
            .expect("soft delete");
        assert_eq!(soft.soft_deleted, 1);
        let visible = store
            .find_profiles(&FindProfilesQuery::default())
            .await
            .expect("find visible");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].github.user_name, "hubot");

        let hard = store
            .delete_profiles(&DeleteProfilesRequest {
                all: true,
                hard: true,
                ..DeleteProfilesRequest::default()
            })
            .await
            .expect("hard delete");
        assert_eq!(hard.hard_deleted, 2);
    }

    #[tokio::test]
    async fn regression_sqlite_update_cannot_rename_onto_another_github_user() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteProfileStore::new(temp.path().join("profiles.sqlite")).expect("open");
        store
            .add_profile(Profile::new("octo", "octo@example.com"))
            .await
            .expect("add");
        store
            .add_profile(Profile::new("hubot", "hubot@example.com"))
            .await
            .expect("add second");

        let error = store
            .update_profile(UpdateProfileRequest {
                filter: ProfileFilter::github_user_name("octo"),
                profile: Profile::new("hubot", "octo@example.com"),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ProfileStoreError::AlreadyExists(name) if name == "hubot"));

        let octo = store
            .find_profiles(&FindProfilesQuery {
                filter: ProfileFilter::github_user_name("octo"),
                ..FindProfilesQuery::default()
            })
            .await
            .expect("find");
        assert_eq!(octo.len(), 1);
        assert_eq!(octo[0].slack.email, "octo@example.com");
    }

    #[tokio::test]
    async fn regression_sqlite_update_of_missing_profile_is_not_found() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteProfileStore::new(temp.path().join("profiles.sqlite")).expect("open");
        let error = store
            .update_profile(UpdateProfileRequest {
                filter: ProfileFilter::github_user_name("ghost"),
                profile: Profile::new("ghost", "ghost@example.com"),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ProfileStoreError::NotFound));
    }
}
