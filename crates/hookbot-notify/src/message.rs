//! Slack attachment model and pull-request notice rendering.

use serde::{Deserialize, Serialize};

pub const SLACK_COLOR_GREEN: &str = "#2cbe4e";
pub const SLACK_COLOR_GRAY: &str = "#586069";
pub const SLACK_COLOR_YELLOW: &str = "#dbab09";
pub const SLACK_COLOR_RED: &str = "#cb2431";

pub const SLACK_EMOJI_OK_HAND: &str = ":ok_hand:";
const SLACK_EMOJI_WRITING_HAND: &str = ":writing_hand:";
const SLACK_EMOJI_POINT_UP: &str = ":point_up:";
const SLACK_EMOJI_POINT_RIGHT: &str = ":point_right:";
const SLACK_EMOJI_WARNING: &str = ":warning:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    #[serde(default)]
    pub short: bool,
}

/// Legacy Slack message attachment as accepted by `chat.postMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackAttachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pretext: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_icon: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub footer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
}

/// A reviewer was requested on a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewRequestedNotice {
    /// Login of the pull request author.
    pub owner: String,
    pub owner_avatar_url: String,
    /// Browser URL of the pull request; doubles as the dedup key.
    pub url: String,
    pub title: String,
    pub body: String,
    pub repo_name: String,
    pub requested_reviewers: Vec<String>,
}

impl ReviewRequestedNotice {
    pub(crate) fn attachment(&self, mentions: &[String], footer: &str, ts: u64) -> SlackAttachment {
        SlackAttachment {
            fallback: "pull request review requested message".to_string(),
            color: SLACK_COLOR_GREEN.to_string(),
            pretext: format!(
                "{SLACK_EMOJI_POINT_RIGHT} {} your review is requested",
                mentions.join(" ")
            ),
            author_name: self.owner.clone(),
            author_icon: non_empty(&self.owner_avatar_url),
            title: self.title.clone(),
            title_link: self.url.clone(),
            text: self.body.clone(),
            footer: footer.to_string(),
            ts: Some(ts),
            fields: vec![repository_field(&self.repo_name)],
        }
    }
}

/// A review was submitted on a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSubmittedNotice {
    pub owner: String,
    pub title: String,
    pub repo_name: String,
    pub reviewer: String,
    pub reviewer_avatar_url: String,
    pub review_body: String,
    pub review_state: String,
    pub review_url: String,
}

impl ReviewSubmittedNotice {
    pub fn is_self_review(&self) -> bool {
        self.owner == self.reviewer
    }

    pub(crate) fn attachment(&self, owner_mention: &str, footer: &str, ts: u64) -> SlackAttachment {
        let (emoji, color) = review_state_style(&self.review_state);
        SlackAttachment {
            fallback: "pull request review submitted".to_string(),
            color: color.to_string(),
            pretext: format!("{emoji} {owner_mention} your PR *{}*", self.review_state),
            author_name: self.reviewer.clone(),
            author_icon: non_empty(&self.reviewer_avatar_url),
            title: format!("PR ({}) review", self.title),
            title_link: self.review_url.clone(),
            text: self.review_body.clone(),
            footer: footer.to_string(),
            ts: Some(ts),
            fields: vec![repository_field(&self.repo_name)],
        }
    }
}

fn review_state_style(state: &str) -> (&'static str, &'static str) {
    match state.to_ascii_lowercase().as_str() {
        "commented" => (SLACK_EMOJI_WRITING_HAND, SLACK_COLOR_GRAY),
        "changes_requested" => (SLACK_EMOJI_POINT_UP, SLACK_COLOR_YELLOW),
        "approved" => (SLACK_EMOJI_OK_HAND, SLACK_COLOR_GREEN),
        _ => (SLACK_EMOJI_WARNING, SLACK_COLOR_RED),
    }
}

fn repository_field(repo_name: &str) -> AttachmentField {
    AttachmentField {
        title: "Repository".to_string(),
        value: repo_name.to_string(),
        short: true,
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}

/// Slack mention markup for a user id.
pub fn mention(slack_user_id: &str) -> String {
    format!("<@{slack_user_id}>")
}

/// Wraps text in a Slack code block. Backtick runs inside the text are split
/// with a zero-width space so they cannot close the block early.
pub fn literalize(text: &str) -> String {
    let body = text.trim_end_matches('\n');
    let mut escaped = String::with_capacity(body.len());
    let mut previous = None;
    for ch in body.chars() {
        if ch == '`' && previous == Some('`') {
            escaped.push(ZERO_WIDTH_SPACE);
        }
        escaped.push(ch);
        previous = Some(ch);
    }
    format!("```\n{escaped}\n```")
}

const ZERO_WIDTH_SPACE: char = '\u{200b}';

pub fn literalize_line(line: &str) -> String {
    format!("`{line}`")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        literalize, mention, ReviewRequestedNotice, ReviewSubmittedNotice, SLACK_COLOR_GRAY,
        SLACK_COLOR_GREEN, SLACK_COLOR_RED, SLACK_COLOR_YELLOW,
    };

    fn submitted(state: &str) -> ReviewSubmittedNotice {
        ReviewSubmittedNotice {
            owner: "octo".to_string(),
            title: "Add widgets".to_string(),
            repo_name: "widgets".to_string(),
            reviewer: "hubot".to_string(),
            review_state: state.to_string(),
            review_url: "https://github.com/acme/widgets/pull/9#pullrequestreview-1".to_string(),
            ..ReviewSubmittedNotice::default()
        }
    }

    #[test]
    fn unit_review_state_selects_emoji_and_color() {
        let cases = [
            ("commented", ":writing_hand:", SLACK_COLOR_GRAY),
            ("CHANGES_REQUESTED", ":point_up:", SLACK_COLOR_YELLOW),
            ("approved", ":ok_hand:", SLACK_COLOR_GREEN),
            ("dismissed", ":warning:", SLACK_COLOR_RED),
        ];
        for (state, emoji, color) in cases {
            let attachment = submitted(state).attachment("<@U1>", "footer", 1);
            assert_eq!(attachment.color, color, "state {state}");
            assert!(attachment.pretext.starts_with(emoji), "state {state}");
            assert!(attachment.pretext.contains("<@U1> your PR"));
        }
    }

    #[test]
    fn functional_review_requested_attachment_serializes_for_slack() {
        let notice = ReviewRequestedNotice {
            owner: "octo".to_string(),
            url: "https://github.com/acme/widgets/pull/9".to_string(),
            title: "Add widgets".to_string(),
            repo_name: "widgets".to_string(),
            requested_reviewers: vec!["hubot".to_string()],
            ..ReviewRequestedNotice::default()
        };
        let attachment =
            notice.attachment(&["<@U1>".to_string(), "<@U2>".to_string()], "Github webhook", 42);
        let value = serde_json::to_value(&attachment).expect("serialize");
        assert_eq!(
            value["pretext"],
            json!(":point_right: <@U1> <@U2> your review is requested")
        );
        assert_eq!(value["title_link"], json!("https://github.com/acme/widgets/pull/9"));
        assert_eq!(value["fields"][0]["title"], json!("Repository"));
        assert_eq!(value["ts"], json!(42));
        assert!(value.get("author_icon").is_none());
        assert!(value.get("text").is_none());
    }

    #[test]
    fn unit_formatting_helpers() {
        assert_eq!(mention("U123"), "<@U123>");
        assert_eq!(literalize("a\n"), "```\na\n```");
    }

    #[test]
    fn regression_literalize_keeps_embedded_fences_inside_the_block() {
        let wrapped = literalize("error: ```rm -rf``` and ````");
        let inner = wrapped
            .strip_prefix("```\n")
            .and_then(|rest| rest.strip_suffix("\n```"))
            .expect("single code block");
        assert!(!inner.contains("``"));
        assert_eq!(inner.replace('\u{200b}', ""), "error: ```rm -rf``` and ````");
        assert_eq!(literalize("`inline` code"), "```\n`inline` code\n```");
    }
}
