//! Execution of parsed mention commands against the profile store.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use hookbot_core::{format_uptime, DisplayTimeZone};
use hookbot_identity::{
    parse_profile_from_chat_input, ChatUser, DeleteProfilesRequest, FindProfilesQuery,
    GithubProfile, Profile, ProfileFilter, SlackProfile, UpdateProfileRequest,
};
use hookbot_notify::{
    literalize, literalize_line, AttachmentField, SlackAttachment, SLACK_COLOR_GREEN,
    SLACK_EMOJI_OK_HAND,
};
use serde::Serialize;

use super::slack_command_helpers::MentionCommand;
use super::SlackBridgeContext;

const DEFAULT_LIST_TEMPLATE: &str = "email={{ slack.email }}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum CommandReply {
    Text(String),
    Attachment(SlackAttachment),
}

/// Profile as exposed to `ls` templates, with timestamps in the display zone.
#[derive(Debug, Serialize)]
struct ProfileView<'a> {
    github: &'a GithubProfile,
    slack: &'a SlackProfile,
    created_at: String,
    updated_at: String,
    deleted_at: String,
}

impl<'a> ProfileView<'a> {
    fn new(profile: &'a Profile, time_zone: DisplayTimeZone) -> Self {
        let render = |value: Option<DateTime<Utc>>| {
            value.map(|at| time_zone.render(at)).unwrap_or_default()
        };
        Self {
            github: &profile.github,
            slack: &profile.slack,
            created_at: render(profile.created_at),
            updated_at: render(profile.updated_at),
            deleted_at: render(profile.deleted_at),
        }
    }
}

/// Runs a command; failures become a code-block reply carrying the error chain.
pub(super) async fn execute_mention_command(
    command: MentionCommand,
    context: &SlackBridgeContext,
    author: &ChatUser,
) -> CommandReply {
    match run_command(command, context, author).await {
        Ok(reply) => reply,
        Err(error) => {
            tracing::warn!(error = %format!("{error:#}"), "mention command failed");
            CommandReply::Text(literalize(&format!("{error:#}")))
        }
    }
}

async fn run_command(
    command: MentionCommand,
    context: &SlackBridgeContext,
    author: &ChatUser,
) -> Result<CommandReply> {
    match command {
        MentionCommand::Help { usage } => Ok(CommandReply::Text(literalize(usage))),
        MentionCommand::Invalid { message } => Ok(CommandReply::Text(literalize(&message))),
        MentionCommand::Version => Ok(CommandReply::Text(literalize_line(env!(
            "CARGO_PKG_VERSION"
        )))),
        MentionCommand::Uptime => Ok(CommandReply::Text(literalize_line(&format_uptime(
            context.clock.uptime(),
        )))),
        MentionCommand::AddUser { profile_json } => add_user(&profile_json, context, author).await,
        MentionCommand::ListUsers {
            filter_json,
            limit,
            all,
            format,
            verbose,
        } => {
            let filter = parse_filter(filter_json.as_deref())?;
            let query = FindProfilesQuery {
                filter,
                limit,
                include_deleted: all,
            };
            list_users(&query, format.as_deref(), verbose, context).await
        }
        MentionCommand::UpdateUser {
            github_user_name,
            profile_json,
        } => update_user(&github_user_name, &profile_json, context).await,
        MentionCommand::DeleteUser {
            filter_json,
            all,
            hard,
        } => {
            let request = DeleteProfilesRequest {
                filter: parse_filter(filter_json.as_deref())?,
                all,
                hard,
            };
            delete_users(&request, context).await
        }
    }
}

fn parse_filter(raw: Option<&str>) -> Result<ProfileFilter> {
    match raw {
        Some(raw) => Ok(parse_profile_from_chat_input(raw)?.as_filter()),
        None => Ok(ProfileFilter::default()),
    }
}

async fn add_user(
    raw: &str,
    context: &SlackBridgeContext,
    author: &ChatUser,
) -> Result<CommandReply> {
    let profile = parse_profile_from_chat_input(raw)?;
    profile.validate().context("user validation failed")?;
    let added = context.profiles.add_profile(profile).await?;
    tracing::info!(
        github_user = %added.github.user_name,
        added_by = %author.id,
        "profile added"
    );

    let text = "user successfully added";
    Ok(CommandReply::Attachment(SlackAttachment {
        fallback: text.to_string(),
        color: SLACK_COLOR_GREEN.to_string(),
        pretext: format!("{SLACK_EMOJI_OK_HAND} {text}"),
        author_name: author.display_name.clone(),
        author_icon: author.image_48.clone(),
        title: "user profile".to_string(),
        text: literalize(&added.pretty()),
        ..SlackAttachment::default()
    }))
}

async fn list_users(
    query: &FindProfilesQuery,
    format: Option<&str>,
    verbose: bool,
    context: &SlackBridgeContext,
) -> Result<CommandReply> {
    let profiles = context.profiles.find_profiles(query).await?;
    let template = format.unwrap_or(DEFAULT_LIST_TEMPLATE);
    let env = minijinja::Environment::new();

    let mut fields = Vec::with_capacity(profiles.len());
    for profile in &profiles {
        let view = ProfileView::new(profile, context.time_zone);
        let value = if verbose {
            serde_json::to_string_pretty(&view).context("failed to render user")?
        } else {
            env.render_str(template, &view)
                .with_context(|| format!("failed to render format '{template}'"))?
        };
        fields.push(AttachmentField {
            title: profile.github.user_name.clone(),
            value,
            short: false,
        });
    }

    let text = if profiles.is_empty() {
        "user not found"
    } else {
        "user found"
    };
    Ok(CommandReply::Attachment(SlackAttachment {
        fallback: text.to_string(),
        color: SLACK_COLOR_GREEN.to_string(),
        text: if fields.is_empty() {
            text.to_string()
        } else {
            String::new()
        },
        fields,
        ..SlackAttachment::default()
    }))
}

async fn update_user(
    github_user_name: &str,
    raw: &str,
    context: &SlackBridgeContext,
) -> Result<CommandReply> {
    let existing = context
        .profiles
        .find_profiles(&FindProfilesQuery {
            filter: ProfileFilter::github_user_name(github_user_name),
            limit: 1,
            include_deleted: false,
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("github user '{github_user_name}' not found"))?;
    let changes = parse_profile_from_chat_input(raw)?;
    let merged = existing.merge(&changes);
    merged.validate().context("user validation failed")?;
    let updated = context
        .profiles
        .update_profile(UpdateProfileRequest {
            filter: existing.identification_filter(),
            profile: merged,
        })
        .await?;

    let text = "user successfully updated";
    Ok(CommandReply::Attachment(SlackAttachment {
        fallback: text.to_string(),
        color: SLACK_COLOR_GREEN.to_string(),
        pretext: format!("{SLACK_EMOJI_OK_HAND} {text}"),
        text: literalize(&updated.pretty()),
        ..SlackAttachment::default()
    }))
}

async fn delete_users(
    request: &DeleteProfilesRequest,
    context: &SlackBridgeContext,
) -> Result<CommandReply> {
    let outcome = context.profiles.delete_profiles(request).await?;
    let text = if request.hard {
        format!("{} user(s) hard deleted", outcome.hard_deleted)
    } else {
        format!("{} user(s) soft deleted", outcome.soft_deleted)
    };
    Ok(CommandReply::Attachment(SlackAttachment {
        fallback: text.clone(),
        color: SLACK_COLOR_GREEN.to_string(),
        text,
        ..SlackAttachment::default()
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hookbot_core::{DisplayTimeZone, ProcessClock};
    use hookbot_identity::{ChatUser, InMemoryProfileStore, Profile};

    use super::{execute_mention_command, CommandReply};
    use crate::slack_runtime::slack_command_helpers::parse_mention_command;
    use crate::slack_runtime::SlackBridgeContext;

    fn context(profiles: Vec<Profile>) -> SlackBridgeContext {
        SlackBridgeContext {
            profiles: Arc::new(InMemoryProfileStore::with_profiles(profiles)),
            clock: ProcessClock::start(),
            time_zone: DisplayTimeZone::default(),
        }
    }

    fn author() -> ChatUser {
        ChatUser {
            id: "UADMIN".to_string(),
            display_name: "admin".to_string(),
            image_48: Some("https://example.com/admin.png".to_string()),
            ..ChatUser::default()
        }
    }

    async fn run(text: &str, context: &SlackBridgeContext) -> CommandReply {
        execute_mention_command(parse_mention_command(text, "UBOT"), context, &author()).await
    }

    fn attachment(reply: CommandReply) -> hookbot_notify::SlackAttachment {
        match reply {
            CommandReply::Attachment(attachment) => attachment,
            CommandReply::Text(text) => panic!("expected attachment, got text: {text}"),
        }
    }

    fn text(reply: CommandReply) -> String {
        match reply {
            CommandReply::Text(text) => text,
            CommandReply::Attachment(attachment) => {
                panic!("expected text, got attachment: {attachment:?}")
            }
        }
    }

    #[tokio::test]
    async fn functional_add_then_list_users() {
        let context = context(Vec::new());
        let added = attachment(
            run(
                "<@UBOT> add user {“github”: {“user_name”: “octo”}, “slack”: {“email”: “<mailto:octo@example.com|octo@example.com>”}}",
                &context,
            )
            .await,
        );
        assert_eq!(added.pretext, ":ok_hand: user successfully added");
        assert_eq!(added.author_name, "admin");
        assert!(added.text.contains("\"email\": \"octo@example.com\""));

        let listed = attachment(run("<@UBOT> ls users", &context).await);
        assert_eq!(listed.fallback, "user found");
        assert_eq!(listed.fields.len(), 1);
        assert_eq!(listed.fields[0].title, "octo");
        assert_eq!(listed.fields[0].value, "email=octo@example.com");
    }

    #[tokio::test]
    async fn functional_list_users_renders_custom_format_and_limit() {
        let context = context(vec![
            Profile::new("alpha", "alpha@example.com"),
            Profile::new("beta", "beta@example.com"),
        ]);
        let listed = attachment(
            run(
                "<@UBOT> ls users --limit 1 --format=name={{github.user_name}}/deleted={{deleted_at}}",
                &context,
            )
            .await,
        );
        assert_eq!(listed.fields.len(), 1);
        assert_eq!(listed.fields[0].value, "name=alpha/deleted=");

        let verbose = attachment(run(r#"<@UBOT> ls users {"github":{"user_name":"beta"}} -v"#, &context).await);
        assert_eq!(verbose.fields.len(), 1);
        assert!(verbose.fields[0].value.contains("\"user_name\": \"beta\""));
    }

    #[tokio::test]
    async fn regression_list_users_reports_empty_result() {
        let context = context(Vec::new());
        let listed = attachment(run("<@UBOT> ls users", &context).await);
        assert_eq!(listed.fallback, "user not found");
        assert_eq!(listed.text, "user not found");
        assert!(listed.fields.is_empty());
    }

    #[tokio::test]
    async fn functional_update_user_merges_changes() {
        let context = context(vec![Profile::new("octo", "old@example.com")]);
        let updated = attachment(
            run(
                r#"<@UBOT> update user octo {"slack": {"email": "new@example.com"}}"#,
                &context,
            )
            .await,
        );
        assert_eq!(updated.pretext, ":ok_hand: user successfully updated");
        assert!(updated.text.contains("\"user_name\": \"octo\""));
        assert!(updated.text.contains("\"email\": \"new@example.com\""));

        let missing = text(
            run(
                r#"<@UBOT> update user ghost {"slack": {"email": "x@example.com"}}"#,
                &context,
            )
            .await,
        );
        assert!(missing.contains("github user 'ghost' not found"));
    }

    #[tokio::test]
    async fn functional_delete_user_soft_then_hard() {
        let context = context(vec![
            Profile::new("alpha", "alpha@example.com"),
            Profile::new("beta", "beta@example.com"),
        ]);
        let soft = attachment(
            run(r#"<@UBOT> delete user {"github":{"user_name":"alpha"}}"#, &context).await,
        );
        assert_eq!(soft.text, "1 user(s) soft deleted");

        let hard = attachment(run("<@UBOT> remove users --all --hard", &context).await);
        assert_eq!(hard.text, "2 user(s) hard deleted");
    }

    #[tokio::test]
    async fn regression_unsafe_delete_and_invalid_input_reply_with_errors() {
        let context = context(vec![Profile::new("alpha", "alpha@example.com")]);
        let unsafe_delete = text(run("<@UBOT> delete user", &context).await);
        assert!(unsafe_delete.starts_with("```"));
        assert!(unsafe_delete.contains("unsafe deletion process"));

        let invalid = text(run(r#"<@UBOT> add user {"github":{"user_name":"x"}}"#, &context).await);
        assert!(invalid.contains("user validation failed: slack.email required"));

        let broken = text(run("<@UBOT> add user {not json", &context).await);
        assert!(broken.contains("failed to parse json"));

        let duplicate = text(
            run(
                r#"<@UBOT> add user {"github":{"user_name":"alpha"},"slack":{"email":"a@example.com"}}"#,
                &context,
            )
            .await,
        );
        assert!(duplicate.contains("already exists"));
    }

    #[tokio::test]
    async fn unit_version_uptime_and_help_are_text_replies() {
        let context = context(Vec::new());
        assert_eq!(
            text(run("<@UBOT> version", &context).await),
            format!("`{}`", env!("CARGO_PKG_VERSION"))
        );
        let uptime = text(run("<@UBOT> uptime", &context).await);
        assert!(uptime.starts_with('`') && uptime.ends_with("s`"));
        assert!(text(run("<@UBOT> help", &context).await).contains("Usage: @hookbot"));
    }
}
