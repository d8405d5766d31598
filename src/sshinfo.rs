//! SSH server detection and mobile key provisioning.
//!
//! The mobile app offers a "connect over SSH" shortcut; the bridge tells it
//! whether an SSH server is reachable and, on request, installs the
//! mobile's public key into `authorized_keys`. Keys are tagged with the
//! mobile id so re-provisioning replaces the previous key instead of
//! accumulating stale ones.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use std::fs;
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::constants::{
    ALTERNATIVE_SSH_PORT, DEFAULT_SSH_PORT, SSH_CONNECT_TIMEOUT, SSH_QUICK_CHECK_TIMEOUT,
};

/// SSH reachability snapshot, shared with the relay at session creation and
/// with the mobile in `cli-info`.
#[derive(Debug, Clone, Serialize)]
pub struct SshInfo {
    pub available: bool,
    pub port: u16,
    pub hostname: String,
    pub username: String,
}

fn port_open(port: u16, timeout: std::time::Duration) -> bool {
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Detect a reachable SSH server: quick probes on the common ports first,
/// then the port named in sshd_config with a longer timeout.
#[must_use]
pub fn detect_ssh_info() -> SshInfo {
    let (available, port) = if port_open(DEFAULT_SSH_PORT, SSH_QUICK_CHECK_TIMEOUT) {
        (true, DEFAULT_SSH_PORT)
    } else if port_open(ALTERNATIVE_SSH_PORT, SSH_QUICK_CHECK_TIMEOUT) {
        (true, ALTERNATIVE_SSH_PORT)
    } else {
        match ssh_port_from_config() {
            Some(port)
                if port != DEFAULT_SSH_PORT
                    && port != ALTERNATIVE_SSH_PORT
                    && port_open(port, SSH_CONNECT_TIMEOUT) =>
            {
                (true, port)
            }
            _ => (false, 0),
        }
    };

    SshInfo {
        available,
        port,
        hostname: current_hostname(),
        username: current_username(),
    }
}

fn ssh_port_from_config() -> Option<u16> {
    const CONFIG_PATHS: &[&str] = &[
        "/etc/ssh/sshd_config",
        "/etc/sshd_config",
        "/usr/local/etc/ssh/sshd_config",
    ];
    for path in CONFIG_PATHS {
        let Ok(data) = fs::read_to_string(path) else {
            continue;
        };
        for line in data.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("Port ") {
                if let Ok(port) = rest.trim().parse() {
                    return Some(port);
                }
            }
        }
        // Config exists but has no Port directive: sshd default.
        return Some(DEFAULT_SSH_PORT);
    }
    None
}

/// Non-loopback IPv4 addresses of this host.
#[must_use]
pub fn local_ipv4_addresses() -> Vec<String> {
    let Ok(interfaces) = local_ip_address::list_afinet_netifas() else {
        return Vec::new();
    };
    let mut ips = Vec::new();
    for (_, ip) in interfaces {
        if let std::net::IpAddr::V4(v4) = ip {
            if !v4.is_loopback() {
                let ip = v4.to_string();
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
        }
    }
    ips
}

/// Install a mobile's SSH public key into `~/.ssh/authorized_keys`,
/// replacing any earlier key tagged with the same mobile id. Returns the
/// message reported back over the control channel.
///
/// # Errors
///
/// Returns an error when the key is not valid base64 or the file cannot be
/// updated; the message is surfaced to the mobile as
/// `ssh-setup-result:error:…`.
pub fn install_ssh_key(mobile_id: &str, key_base64: &str) -> Result<String> {
    let key_bytes = BASE64
        .decode(key_base64)
        .map_err(|_| anyhow::anyhow!("Invalid key encoding"))?;
    let public_key = String::from_utf8_lossy(&key_bytes).trim().to_string();
    if public_key.is_empty() {
        anyhow::bail!("Invalid key encoding");
    }

    let home = dirs::home_dir().context("Cannot find home directory")?;
    let ssh_dir = home.join(".ssh");
    fs::create_dir_all(&ssh_dir).context("Cannot create .ssh directory")?;
    #[cfg(unix)]
    fs::set_permissions(&ssh_dir, fs::Permissions::from_mode(crate::constants::DIR_MODE))
        .context("Cannot set .ssh permissions")?;

    let auth_keys = ssh_dir.join("authorized_keys");
    install_key_in_file(&auth_keys, &public_key, mobile_id)
}

fn install_key_in_file(auth_keys: &Path, public_key: &str, mobile_id: &str) -> Result<String> {
    let existing = fs::read_to_string(auth_keys).unwrap_or_default();

    if existing.contains(public_key) {
        return Ok("Key already installed".to_string());
    }

    let tag = format!("aipilot-{mobile_id}");
    let mut lines: Vec<&str> = Vec::new();
    let mut replaced_old = false;
    for line in existing.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains(&tag) {
            replaced_old = true;
            continue;
        }
        lines.push(line);
    }

    let key_line = format!("{public_key} {tag}");
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    content.push_str(&key_line);
    content.push('\n');

    fs::write(auth_keys, content).context("Cannot write authorized_keys")?;
    #[cfg(unix)]
    fs::set_permissions(auth_keys, fs::Permissions::from_mode(crate::constants::FILE_MODE))
        .context("Cannot set authorized_keys permissions")?;

    if replaced_old {
        Ok("Key updated (replaced old key)".to_string())
    } else {
        Ok("Key installed successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_key_appends_with_tag() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = dir.path().join("authorized_keys");

        let msg = install_key_in_file(&auth, "ssh-ed25519 AAAA phone", "m-1").unwrap();
        assert_eq!(msg, "Key installed successfully");
        let content = fs::read_to_string(&auth).unwrap();
        assert!(content.contains("ssh-ed25519 AAAA phone aipilot-m-1"));
    }

    #[test]
    fn test_install_key_replaces_same_mobile() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = dir.path().join("authorized_keys");

        install_key_in_file(&auth, "ssh-ed25519 OLD phone", "m-1").unwrap();
        let msg = install_key_in_file(&auth, "ssh-ed25519 NEW phone", "m-1").unwrap();
        assert_eq!(msg, "Key updated (replaced old key)");

        let content = fs::read_to_string(&auth).unwrap();
        assert!(!content.contains("OLD"));
        assert!(content.contains("ssh-ed25519 NEW phone aipilot-m-1"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_install_key_idempotent_for_same_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = dir.path().join("authorized_keys");

        install_key_in_file(&auth, "ssh-ed25519 KEY phone", "m-1").unwrap();
        let msg = install_key_in_file(&auth, "ssh-ed25519 KEY phone", "m-1").unwrap();
        assert_eq!(msg, "Key already installed");
        assert_eq!(fs::read_to_string(&auth).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_install_key_preserves_other_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = dir.path().join("authorized_keys");
        fs::write(&auth, "ssh-rsa LAPTOP someone@laptop\n").unwrap();

        install_key_in_file(&auth, "ssh-ed25519 KEY phone", "m-1").unwrap();
        let content = fs::read_to_string(&auth).unwrap();
        assert!(content.contains("ssh-rsa LAPTOP someone@laptop"));
        assert!(content.contains("aipilot-m-1"));
    }

    #[test]
    fn test_install_ssh_key_rejects_bad_base64() {
        assert!(install_ssh_key("m-1", "not%%base64").is_err());
    }

    #[test]
    fn test_detect_ssh_info_has_identity_fields() {
        let info = detect_ssh_info();
        assert!(!info.hostname.is_empty());
        assert!(!info.username.is_empty());
    }
}
