//! Slash-command parsing.
//!
//! Grammar: `/<name>( <token>)*`. Bare tokens become positional args in
//! order; `--key value` pairs become named args; a bare `--key` with no
//! following value is boolean `true`.

use std::collections::HashMap;

use keel::AgentError;

/// A parsed command invocation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    /// Command name without the prefix.
    pub name: String,
    /// Positional arguments in input order.
    pub positional: Vec<String>,
    /// Named `--key` arguments.
    pub named: HashMap<String, serde_json::Value>,
}

/// Parse an input line as a command. Errors when the prefix is missing
/// or the name is empty.
pub fn parse_command(input: &str, prefix: &str) -> Result<ParsedCommand, AgentError> {
    let trimmed = input.trim();
    let rest = trimmed.strip_prefix(prefix).ok_or_else(|| {
        AgentError::validation("NOT_A_COMMAND", format!("input does not start with {prefix}"))
    })?;
    let mut tokens = rest.split_whitespace().peekable();
    let name = tokens
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AgentError::validation("EMPTY_COMMAND", "command name is empty"))?
        .to_string();

    let mut positional = Vec::new();
    let mut named = HashMap::new();
    while let Some(token) = tokens.next() {
        if let Some(key) = token.strip_prefix("--") {
            match tokens.peek() {
                // `--key value`, unless the next token is itself a flag.
                Some(next) if !next.starts_with("--") => {
                    let value = tokens.next().expect("peeked");
                    named.insert(key.to_string(), value.into());
                }
                _ => {
                    named.insert(key.to_string(), true.into());
                }
            }
        } else {
            positional.push(token.to_string());
        }
    }
    Ok(ParsedCommand {
        name,
        positional,
        named,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_only() {
        let cmd = parse_command("/status", "/").unwrap();
        assert_eq!(cmd.name, "status");
        assert!(cmd.positional.is_empty());
        assert!(cmd.named.is_empty());
    }

    #[test]
    fn positional_args_keep_order() {
        let cmd = parse_command("/model gpt-4o-mini extra", "/").unwrap();
        assert_eq!(cmd.positional, ["gpt-4o-mini", "extra"]);
    }

    #[test]
    fn named_args_and_trailing_boolean() {
        let cmd = parse_command("/session --limit 5 --verbose", "/").unwrap();
        assert_eq!(cmd.named["limit"], "5");
        assert_eq!(cmd.named["verbose"], true);
    }

    #[test]
    fn adjacent_flags_are_both_boolean() {
        let cmd = parse_command("/config --json --full", "/").unwrap();
        assert_eq!(cmd.named["json"], true);
        assert_eq!(cmd.named["full"], true);
    }

    #[test]
    fn missing_prefix_rejected() {
        assert!(parse_command("status", "/").is_err());
    }

    #[test]
    fn bare_prefix_rejected() {
        assert!(parse_command("/", "/").is_err());
        assert!(parse_command("/   ", "/").is_err());
    }
}
