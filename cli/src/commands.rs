//! Slash commands of the REPL.
//!
//! Anything not starting with `/` is sent to the assistant as a chat message.

use fieldhand_engine::EntityKey;

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub usage: &'static str,
    pub description: &'static str,
}

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        usage: "list",
        description: "Show pending and confirmed actions",
    },
    CommandSpec {
        usage: "confirm <n>",
        description: "Confirm a pending action now",
    },
    CommandSpec {
        usage: "cancel <n>",
        description: "Discard a pending action",
    },
    CommandSpec {
        usage: "undo <n>",
        description: "Delete a confirmed action from the server",
    },
    CommandSpec {
        usage: "auto <n> on|off",
        description: "Start or stop the auto-confirm countdown",
    },
    CommandSpec {
        usage: "dismiss <n>",
        description: "Remove a settled action from the list",
    },
    CommandSpec {
        usage: "retry",
        description: "Retry the last failed save or undo",
    },
    CommandSpec {
        usage: "sources",
        description: "Show citations for the last reply",
    },
    CommandSpec {
        usage: "q, quit",
        description: "Exit",
    },
];

#[must_use]
pub fn command_help() -> String {
    let width = COMMAND_SPECS
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    COMMAND_SPECS
        .iter()
        .map(|spec| format!("  /{:<width$}  {}", spec.usage, spec.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Chat(&'a str),
    Command(Command<'a>),
    Empty,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    List,
    Confirm(EntityKey),
    Cancel(EntityKey),
    Undo(EntityKey),
    Auto { key: EntityKey, enabled: bool },
    Dismiss(EntityKey),
    Retry,
    Sources,
    Quit,
    Help,
    /// Known command with missing or malformed arguments.
    Usage(&'static str),
    Unknown(&'a str),
}

fn parse_key(raw: Option<&str>) -> Option<EntityKey> {
    raw?.trim_start_matches('#').parse().ok().map(EntityKey::new)
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        match line.strip_prefix('/') {
            Some(raw) => Input::Command(Command::parse(raw)),
            None => Input::Chat(line),
        }
    }
}

impl<'a> Command<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let parts: Vec<&str> = raw.split_whitespace().collect();
        let key = || parse_key(parts.get(1).copied());

        match parts.first().copied() {
            Some("list" | "ls") => Command::List,
            Some("confirm" | "c") => key().map_or(Command::Usage("confirm <n>"), Command::Confirm),
            Some("cancel" | "x") => key().map_or(Command::Usage("cancel <n>"), Command::Cancel),
            Some("undo" | "u") => key().map_or(Command::Usage("undo <n>"), Command::Undo),
            Some("auto") => {
                let enabled = match parts.get(2).copied() {
                    Some("on") => Some(true),
                    Some("off") => Some(false),
                    _ => None,
                };
                match (key(), enabled) {
                    (Some(key), Some(enabled)) => Command::Auto { key, enabled },
                    _ => Command::Usage("auto <n> on|off"),
                }
            }
            Some("dismiss" | "d") => key().map_or(Command::Usage("dismiss <n>"), Command::Dismiss),
            Some("retry" | "r") => Command::Retry,
            Some("sources") => Command::Sources,
            Some("q" | "quit") => Command::Quit,
            Some("help" | "h" | "?") => Command::Help,
            Some(cmd) => Command::Unknown(cmd),
            None => Command::Help,
        }
    }
}
