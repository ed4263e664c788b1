use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Replace the last assistant reply
    Regen,
    /// Start the conversation over
    Clear,
    /// Load a stored conversation by id
    Load,
    /// Stop the reply being generated
    Cancel,
    /// Show help
    Help,
    /// Exit the session
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Regen => "ask for a different answer to your last message",
            SlashCommand::Clear => "clear the conversation and start over",
            SlashCommand::Load => "continue a stored conversation: /load <id>",
            SlashCommand::Cancel => "stop the reply that is being generated",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "end the session",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }

    /// Whether this command can run while a reply is still being generated.
    pub fn available_while_replying(self) -> bool {
        matches!(self, SlashCommand::Cancel | SlashCommand::Help | SlashCommand::Bye)
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let body = input.trim().strip_prefix('/')?;

    let mut parts = body.split_whitespace();
    let head = parts.next()?.to_lowercase();
    let rest: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(&head).ok().or_else(|| match head.as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "r" | "retry" | "regenerate" => Some(SlashCommand::Regen),
        "new" | "reset" => Some(SlashCommand::Clear),
        "stop" => Some(SlashCommand::Cancel),
        "?" | "h" => Some(SlashCommand::Help),
        _ => None,
    })?;

    let argument = if rest.is_empty() { None } else { Some(rest.join(" ")) };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }

    help.push_str("\nAliases: /q for /bye, /r for /regen, /new for /clear, /stop for /cancel");
    help.push_str("\nAnything else you type is sent as your reply.");

    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(parse_slash_command("/regen").unwrap().command, SlashCommand::Regen);
        assert_eq!(parse_slash_command("  /Clear ").unwrap().command, SlashCommand::Clear);
        assert_eq!(parse_slash_command("/q").unwrap().command, SlashCommand::Bye);
        assert_eq!(parse_slash_command("/stop").unwrap().command, SlashCommand::Cancel);
    }

    #[test]
    fn test_load_takes_an_argument() {
        let parsed = parse_slash_command("/load 7f3a-22").unwrap();
        assert_eq!(parsed.command, SlashCommand::Load);
        assert_eq!(parsed.argument(), Some("7f3a-22"));
        assert_eq!(parse_slash_command("/load").unwrap().argument(), None);
    }

    #[test]
    fn test_plain_text_and_unknown_commands() {
        assert!(parse_slash_command("I led a team of five").is_none());
        assert!(parse_slash_command("/dance").is_none());
        assert!(parse_slash_command("/").is_none());
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = get_help_text();
        for command in SlashCommand::iter() {
            assert!(help.contains(&format!("/{}", command.command())));
        }
    }

    #[test]
    fn test_only_some_commands_run_mid_reply() {
        assert!(SlashCommand::Cancel.available_while_replying());
        assert!(!SlashCommand::Regen.available_while_replying());
        assert!(!SlashCommand::Load.available_while_replying());
    }
}
