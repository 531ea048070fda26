//! Slash-command metadata and parsing.

/// Static slash command metadata used by parsing and `/help`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: &'static str,
    pub description: &'static str,
}

/// Built-in slash commands for interactive mode.
pub const SLASH_COMMANDS: [SlashCommand; 10] = [
    SlashCommand {
        name: "/tasks",
        description: "List every task and its status.",
    },
    SlashCommand {
        name: "/logs",
        description: "Show recent log lines of a task: /logs <id>.",
    },
    SlashCommand {
        name: "/approvals",
        description: "List outstanding approval requests.",
    },
    SlashCommand {
        name: "/approve",
        description: "Approve one request: /approve <approval-id>.",
    },
    SlashCommand {
        name: "/approve-session",
        description: "Approve and stop asking for this action: /approve-session <approval-id>.",
    },
    SlashCommand {
        name: "/reject",
        description: "Reject a request: /reject <approval-id>.",
    },
    SlashCommand {
        name: "/cancel",
        description: "Cancel a queued or running task: /cancel <id>.",
    },
    SlashCommand {
        name: "/help",
        description: "List available slash commands.",
    },
    SlashCommand {
        name: "/quit",
        description: "Exit interactive mode.",
    },
    SlashCommand {
        name: "/exit",
        description: "Exit interactive mode.",
    },
];

/// Parsed slash command actions consumed by the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommandAction {
    Tasks,
    Logs(Option<String>),
    Approvals,
    Approve(Option<String>),
    ApproveSession(Option<String>),
    Reject(Option<String>),
    Cancel(Option<String>),
    Help,
    Quit,
    Unknown(String),
}

/// Parse a slash command from user input.
///
/// Returns `None` if the input is not a slash command.
pub fn parse_slash_command(input: &str) -> Option<SlashCommandAction> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let token = words.next().unwrap_or("").to_ascii_lowercase();
    let arg = words.next().map(str::to_string);

    let action = match token.as_str() {
        "/" | "/help" => SlashCommandAction::Help,
        "/quit" | "/exit" | "/q" => SlashCommandAction::Quit,
        "/tasks" => SlashCommandAction::Tasks,
        "/logs" => SlashCommandAction::Logs(arg),
        "/approvals" => SlashCommandAction::Approvals,
        "/approve" => SlashCommandAction::Approve(arg),
        "/approve-session" => SlashCommandAction::ApproveSession(arg),
        "/reject" => SlashCommandAction::Reject(arg),
        "/cancel" => SlashCommandAction::Cancel(arg),
        other => SlashCommandAction::Unknown(other.to_string()),
    };

    Some(action)
}

/// `/help` text, one command per line.
pub fn help_text() -> String {
    SLASH_COMMANDS
        .iter()
        .map(|cmd| format!("{:<18} {}", cmd.name, cmd.description))
        .collect::<Vec<_>>()
        .join("\n")
}
