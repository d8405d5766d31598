//! Detection and selection of installed AI terminal agents.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// Known agent families. Drives per-agent behavior such as how an uploaded
/// file is referenced at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Gemini,
    Openai,
    Aider,
    Generic,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Openai => "openai",
            Self::Aider => "aider",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// An agent found on this machine.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub command: String,
    pub agent_type: AgentType,
    pub version: String,
}

/// CLI agents worth probing for. IDE extensions are not listed — only
/// commands that run a terminal session.
const KNOWN_AGENTS: &[(&str, AgentType)] = &[
    ("claude", AgentType::Claude),
    ("aider", AgentType::Aider),
    ("gemini", AgentType::Gemini),
];

/// Classify a command name into an agent family.
#[must_use]
pub fn detect_agent_type(command: &str) -> AgentType {
    let cmd = command.to_ascii_lowercase();
    if cmd.contains("claude") {
        AgentType::Claude
    } else if cmd.contains("gemini") {
        AgentType::Gemini
    } else if cmd.contains("gpt") || cmd.contains("codex") || cmd.contains("openai") {
        AgentType::Openai
    } else if cmd.contains("aider") {
        AgentType::Aider
    } else {
        AgentType::Generic
    }
}

/// Resolve a command through `PATH`.
///
/// # Errors
///
/// Returns an error naming the command when it cannot be found.
pub fn check_command(command: &str) -> Result<PathBuf> {
    find_in_path(command)
        .with_context(|| format!("command '{command}' not found in PATH"))
}

fn find_in_path(command: &str) -> Option<PathBuf> {
    let command = PathBuf::from(command);
    if command.is_absolute() {
        return command.is_file().then_some(command);
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(&command);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Ask an agent for its version string.
///
/// Returns an empty string when the command fails or the output looks like
/// a prompt or error rather than a version.
#[must_use]
pub fn agent_version(command: &str) -> String {
    let output = match std::process::Command::new(command).arg("--version").output() {
        Ok(output) => output,
        Err(_) => return String::new(),
    };
    let first_line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut version = first_line;
    if version.len() > 50 {
        version.truncate(47);
        version.push_str("...");
    }

    let lowered = version.to_ascii_lowercase();
    if lowered.contains("install") || lowered.contains("error") || version.contains('?') {
        return String::new();
    }
    version
}

/// Probe `PATH` for every known agent.
#[must_use]
pub fn detect_available_agents() -> Vec<AgentInfo> {
    KNOWN_AGENTS
        .iter()
        .filter(|(command, _)| find_in_path(command).is_some())
        .map(|&(command, agent_type)| AgentInfo {
            command: command.to_string(),
            agent_type,
            version: agent_version(command),
        })
        .collect()
}

/// Let the operator pick an agent when more than one is installed.
///
/// A single hit is used without asking; a bad or empty answer falls back to
/// the first entry.
#[must_use]
pub fn select_agent(agents: &[AgentInfo]) -> Option<String> {
    match agents {
        [] => None,
        [only] => {
            println!("Detected: {}", only.command);
            Some(only.command.clone())
        }
        _ => {
            println!("\n=== Available AI Agents ===");
            for (i, agent) in agents.iter().enumerate() {
                if agent.version.is_empty() {
                    println!("  [{}] {}", i + 1, agent.command);
                } else {
                    println!("  [{}] {} ({})", i + 1, agent.command, agent.version);
                }
            }
            print!("\nSelect agent [1-{}]: ", agents.len());
            let _ = std::io::stdout().flush();

            let mut input = String::new();
            let _ = std::io::stdin().read_line(&mut input);
            let choice = input.trim().parse::<usize>().ok();

            let picked = match choice {
                Some(n) if (1..=agents.len()).contains(&n) => &agents[n - 1],
                _ => {
                    println!("Using default: {}", agents[0].command);
                    &agents[0]
                }
            };
            Some(picked.command.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_agent_type() {
        assert_eq!(detect_agent_type("claude"), AgentType::Claude);
        assert_eq!(detect_agent_type("/usr/local/bin/claude"), AgentType::Claude);
        assert_eq!(detect_agent_type("gemini"), AgentType::Gemini);
        assert_eq!(detect_agent_type("codex"), AgentType::Openai);
        assert_eq!(detect_agent_type("aider"), AgentType::Aider);
        assert_eq!(detect_agent_type("my-shell"), AgentType::Generic);
    }

    #[test]
    fn test_agent_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentType::Claude).unwrap(),
            r#""claude""#
        );
        let parsed: AgentType = serde_json::from_str(r#""gemini""#).unwrap();
        assert_eq!(parsed, AgentType::Gemini);
    }

    #[test]
    fn test_check_command_finds_sh() {
        assert!(check_command("sh").is_ok());
        assert!(check_command("definitely-not-installed-agent").is_err());
    }
}
