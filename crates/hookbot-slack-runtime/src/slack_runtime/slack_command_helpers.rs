//! Mention command parsing and usage text.

const ROOT_USAGE: &str = "Usage: @hookbot <COMMAND> <OPTIONS> <ARGS>

Commands:
  help [COMMAND]  print usage
  version         print version
  uptime          print uptime
  add user        add user (alias: create)
  ls users        list users (aliases: list, find, search)
  update user     update user
  delete user     delete users (alias: remove)

Run `@hookbot <COMMAND> --help` for command options.";

const ADD_USAGE: &str = r#"add user
Usage: @hookbot add user <user_json>

# add a user
@hookbot add user {"github": {"user_name": "octocat"}, "slack": {"email": "octo@example.com"}}"#;

const LS_USAGE: &str = r#"ls users
Usage: @hookbot ls users [filter_json] [--limit N] [--all] [--format TEMPLATE] [-v|--verbose]

Options:
  --limit N          max users to show (0 shows all)
  --all              include soft deleted users
  --format TEMPLATE  template rendered per user (default: email={{slack.email}})
  -v, --verbose      show the full user record

# pick the fields to show
@hookbot ls users --format=email={{slack.email}}/deleted={{deleted_at}}"#;

const UPDATE_USAGE: &str = r#"update user
Usage: @hookbot update user <github_user_name> <update_json>

# change the slack email of github user "octocat"
@hookbot update user octocat {"slack": {"email": "new@example.com"}}"#;

const DELETE_USAGE: &str = r#"delete user
Usage: @hookbot delete user <filter_json> [--all] [--hard]

Options:
  --all   allow an empty filter to match every user
  --hard  remove records instead of marking them deleted

@hookbot delete user {"github": {"user_name": "octocat"}}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum MentionCommand {
    Help {
        usage: &'static str,
    },
    Version,
    Uptime,
    AddUser {
        profile_json: String,
    },
    ListUsers {
        filter_json: Option<String>,
        limit: usize,
        all: bool,
        format: Option<String>,
        verbose: bool,
    },
    UpdateUser {
        github_user_name: String,
        profile_json: String,
    },
    DeleteUser {
        filter_json: Option<String>,
        all: bool,
        hard: bool,
    },
    Invalid {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandName {
    Add,
    Ls,
    Update,
    Delete,
}

impl CommandName {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "add" | "create" => Some(Self::Add),
            "ls" | "list" | "find" | "search" => Some(Self::Ls),
            "update" => Some(Self::Update),
            "delete" | "remove" => Some(Self::Delete),
            _ => None,
        }
    }

    fn usage(self) -> &'static str {
        match self {
            Self::Add => ADD_USAGE,
            Self::Ls => LS_USAGE,
            Self::Update => UPDATE_USAGE,
            Self::Delete => DELETE_USAGE,
        }
    }
}

fn topic_usage(topic: &str) -> &'static str {
    match topic {
        "version" | "uptime" | "help" => ROOT_USAGE,
        other => CommandName::parse(other).map_or(ROOT_USAGE, CommandName::usage),
    }
}

/// Splits message text into arguments, dropping the leading bot mention.
pub(super) fn mention_arguments(text: &str, bot_user_id: &str) -> Vec<String> {
    let mut tokens = text.split_whitespace().peekable();
    if let Some(first) = tokens.peek() {
        if is_bot_mention(first, bot_user_id) {
            tokens.next();
        }
    }
    tokens.map(str::to_string).collect()
}

pub(super) fn mentions_bot(text: &str, bot_user_id: &str) -> bool {
    text.split_whitespace()
        .any(|token| is_bot_mention(token, bot_user_id))
}

fn is_bot_mention(token: &str, bot_user_id: &str) -> bool {
    let Some(inner) = token
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
    else {
        return false;
    };
    let id = inner.split_once('|').map_or(inner, |(id, _)| id);
    id == bot_user_id
}

pub(super) fn parse_mention_command(text: &str, bot_user_id: &str) -> MentionCommand {
    let mut args = CommandArgs::new(mention_arguments(text, bot_user_id));
    let help_requested = args.take_flag("help", Some('h'));

    let Some(command) = args.next_positional() else {
        return MentionCommand::Help { usage: ROOT_USAGE };
    };
    match command.as_str() {
        "help" => {
            let usage = args
                .next_positional()
                .map_or(ROOT_USAGE, |topic| topic_usage(&topic));
            MentionCommand::Help { usage }
        }
        "version" if help_requested => MentionCommand::Help { usage: ROOT_USAGE },
        "version" => MentionCommand::Version,
        "uptime" if help_requested => MentionCommand::Help { usage: ROOT_USAGE },
        "uptime" => MentionCommand::Uptime,
        other => match CommandName::parse(other) {
            Some(name) => parse_resource_command(name, args, help_requested),
            None => MentionCommand::Invalid {
                message: format!("unknown command '{other}'\n\n{ROOT_USAGE}"),
            },
        },
    }
}

fn parse_resource_command(
    name: CommandName,
    mut args: CommandArgs,
    help_requested: bool,
) -> MentionCommand {
    let usage = name.usage();
    if help_requested {
        return MentionCommand::Help { usage };
    }
    match args.next_positional().as_deref() {
        Some("user" | "users") => {}
        Some(other) => {
            return MentionCommand::Invalid {
                message: format!("unknown resource '{other}'\n\n{usage}"),
            }
        }
        None => return MentionCommand::Help { usage },
    }

    let parsed = match name {
        CommandName::Add => parse_add_user(args),
        CommandName::Ls => parse_list_users(args),
        CommandName::Update => parse_update_user(args),
        CommandName::Delete => parse_delete_user(args),
    };
    match parsed {
        Ok(command) => command,
        Err(message) => MentionCommand::Invalid {
            message: format!("{message}\n\n{usage}"),
        },
    }
}

fn parse_add_user(args: CommandArgs) -> Result<MentionCommand, String> {
    let rest = args.finish()?;
    if rest.is_empty() {
        return Ok(MentionCommand::Help { usage: ADD_USAGE });
    }
    Ok(MentionCommand::AddUser {
        profile_json: rest.join(" "),
    })
}

fn parse_list_users(mut args: CommandArgs) -> Result<MentionCommand, String> {
    let all = args.take_flag("all", None);
    let verbose = args.take_flag("verbose", Some('v'));
    let limit = match args.take_value("limit")? {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid --limit value '{raw}'"))?,
        None => 0,
    };
    let format = args.take_value("format")?;
    let rest = args.finish()?;
    Ok(MentionCommand::ListUsers {
        filter_json: joined(rest),
        limit,
        all,
        format,
        verbose,
    })
}

fn parse_update_user(args: CommandArgs) -> Result<MentionCommand, String> {
    let mut rest = args.finish()?;
    if rest.len() < 2 {
        return Ok(MentionCommand::Help {
            usage: UPDATE_USAGE,
        });
    }
    let github_user_name = rest.remove(0);
    Ok(MentionCommand::UpdateUser {
        github_user_name,
        profile_json: rest.join(" "),
    })
}

fn parse_delete_user(mut args: CommandArgs) -> Result<MentionCommand, String> {
    let all = args.take_flag("all", None);
    let hard = args.take_flag("hard", None);
    let rest = args.finish()?;
    Ok(MentionCommand::DeleteUser {
        filter_json: joined(rest),
        all,
        hard,
    })
}

fn joined(rest: Vec<String>) -> Option<String> {
    (!rest.is_empty()).then(|| rest.join(" "))
}

/// Remaining command arguments; flags are consumed by name before the
/// positionals are read.
struct CommandArgs {
    tokens: Vec<String>,
}

impl CommandArgs {
    fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    fn next_positional(&mut self) -> Option<String> {
        let index = self.tokens.iter().position(|token| !is_flag(token))?;
        Some(self.tokens.remove(index))
    }

    fn take_flag(&mut self, long: &str, short: Option<char>) -> bool {
        let long = format!("--{long}");
        let short = short.map(|short| format!("-{short}"));
        let before = self.tokens.len();
        self.tokens
            .retain(|token| *token != long && Some(token) != short.as_ref());
        self.tokens.len() != before
    }

    fn take_value(&mut self, long: &str) -> Result<Option<String>, String> {
        let flag = format!("--{long}");
        let prefix = format!("--{long}=");
        let Some(index) = self
            .tokens
            .iter()
            .position(|token| *token == flag || token.starts_with(&prefix))
        else {
            return Ok(None);
        };
        let token = self.tokens.remove(index);
        if let Some(value) = token.strip_prefix(&prefix) {
            return Ok(Some(value.to_string()));
        }
        if index < self.tokens.len() && !is_flag(&self.tokens[index]) {
            return Ok(Some(self.tokens.remove(index)));
        }
        Err(format!("missing value for {flag}"))
    }

    /// Rejects unknown flags and returns the positionals in order.
    fn finish(self) -> Result<Vec<String>, String> {
        if let Some(flag) = self.tokens.iter().find(|token| is_flag(token)) {
            return Err(format!("unknown flag '{flag}'"));
        }
        Ok(self.tokens)
    }
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}
