//! Meta-commands intercepted at the agent prompt.
//!
//! A line typed at either client that matches a command here is executed by
//! the bridge itself instead of reaching the agent. Matching happens on the
//! lowercased, trimmed line; the double-slash prefix avoids colliding with
//! the agents' own slash commands (legacy single-slash spellings that were
//! unambiguous remain as aliases).

/// A recognized bridge command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    /// Show the pairing QR code in the alternate screen.
    Qr,
    /// Print the connection status block.
    Status,
    /// Evict the connected mobile.
    Disconnect,
    /// Delete every relay session belonging to this PC.
    Purge,
    /// Shut the bridge down.
    Quit,
}

impl MetaCommand {
    /// Match a lowercased, trimmed input line against the command table.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            "//qr" | "/qr" => Some(Self::Qr),
            "//status" | "/cli-status" => Some(Self::Status),
            "//disconnect" => Some(Self::Disconnect),
            "//purge" => Some(Self::Purge),
            "//quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_commands() {
        assert_eq!(MetaCommand::parse("//qr"), Some(MetaCommand::Qr));
        assert_eq!(MetaCommand::parse("//status"), Some(MetaCommand::Status));
        assert_eq!(
            MetaCommand::parse("//disconnect"),
            Some(MetaCommand::Disconnect)
        );
        assert_eq!(MetaCommand::parse("//purge"), Some(MetaCommand::Purge));
        assert_eq!(MetaCommand::parse("//quit"), Some(MetaCommand::Quit));
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(MetaCommand::parse("/qr"), Some(MetaCommand::Qr));
        assert_eq!(MetaCommand::parse("/cli-status"), Some(MetaCommand::Status));
    }

    #[test]
    fn test_agent_slash_commands_pass_through() {
        assert_eq!(MetaCommand::parse("/status"), None);
        assert_eq!(MetaCommand::parse("/help"), None);
        assert_eq!(MetaCommand::parse("//unknown"), None);
        assert_eq!(MetaCommand::parse("ls -la"), None);
    }
}
