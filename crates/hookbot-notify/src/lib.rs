//! Pull-request notifications for the Slack notification channel.
//!
//! [`DuplicateSuppressor`] drops webhook fan-out duplicates, the message
//! module renders Slack attachments and [`PullRequestNotifier`] ties both to
//! identity resolution and a [`ChatPoster`].

mod message;
mod notifier;
mod suppressor;

pub use message::{
    literalize, literalize_line, mention, AttachmentField, ReviewRequestedNotice,
    ReviewSubmittedNotice, SlackAttachment, SLACK_COLOR_GRAY, SLACK_COLOR_GREEN, SLACK_COLOR_RED,
    SLACK_COLOR_YELLOW, SLACK_EMOJI_OK_HAND,
};
pub use notifier::{ChatPoster, NotifyOutcome, PullRequestNotifier, REVIEW_REQUEST_DUPLICATE_WINDOW};
pub use suppressor::{
    DuplicateSuppressor, SweeperHandle, DEFAULT_RETENTION_HORIZON, DEFAULT_SWEEP_INTERVAL,
};
