//! Host information reported to the mobile.
//!
//! Serialized as camelCase — that is the key style the mobile app reads;
//! changing it is a breaking protocol change.

use serde::Serialize;

use crate::agents::AgentType;
use crate::constants::VERSION;
use crate::sshinfo;

/// Body of the `cli-info:<json>` control frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CliInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub hostname: String,
    pub user: String,
    pub cli_version: &'static str,
    pub working_dir: String,
    pub agent: String,
    pub agent_type: String,
    pub ssh_running: bool,
    pub ssh_port: u16,
    pub ips: Vec<String>,
}

/// Collect the host info snapshot for one `info-request`.
#[must_use]
pub fn gather(command: &str, agent_type: AgentType, working_dir: &str) -> CliInfo {
    let ssh = sshinfo::detect_ssh_info();
    CliInfo {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        hostname: ssh.hostname.clone(),
        user: ssh.username.clone(),
        cli_version: VERSION,
        working_dir: working_dir.to_string(),
        agent: command.to_string(),
        agent_type: agent_type.to_string(),
        ssh_running: ssh.available,
        ssh_port: ssh.port,
        ips: sshinfo::local_ipv4_addresses(),
    }
}
