//! Persistent PC identity and per-directory preferences.
//!
//! The identity file holds the PC's UUID, its long-term X25519 key pair
//! (hex at rest), and the list of paired mobile devices. It is created
//! lazily on first run and only ever mutated by pairing add/remove.
//!
//! Files live under `<config>/aipilot/`:
//! - `config.json` — PC identity, mode 0600 (parent 0700)
//! - `directories.json` — per-workdir agent preference, purely advisory
//!
//! `AIPILOT_CONFIG_DIR` overrides the directory for test isolation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::crypto;

/// A mobile device paired with this PC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedMobile {
    pub id: String,
    pub name: String,
    pub public_key: String,
    #[serde(default)]
    pub paired_at: String,
}

/// The PC's persisted identity and paired devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcConfig {
    pub pc_id: String,
    pub pc_name: String,
    /// Hex-encoded X25519 secret scalar. Never leaves this file.
    pub private_key: String,
    /// Hex-encoded X25519 public key matching `private_key`.
    pub public_key: String,
    #[serde(default)]
    pub paired_mobiles: Vec<PairedMobile>,
    pub created_at: String,
}

impl PcConfig {
    /// Load the existing identity, or `None` if this is a first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Option<Self>> {
        let path = config_dir()?.join("config.json");
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("failed to read PC config"),
        };
        let config = serde_json::from_str(&data).context("failed to parse PC config")?;
        Ok(Some(config))
    }

    /// Create a fresh identity with a new key pair and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or the initial save fails.
    pub fn create() -> Result<Self> {
        let (secret, public) = crypto::generate_keypair();

        let pc_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "Unknown PC".to_string());

        let config = Self {
            pc_id: uuid::Uuid::new_v4().to_string(),
            pc_name,
            private_key: hex::encode(secret.to_bytes()),
            public_key: hex::encode(public.as_bytes()),
            paired_mobiles: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        config.save()?;
        log::info!("Created PC identity {}", config.pc_id);
        Ok(config)
    }

    /// Load the identity, creating it on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or creation fails.
    pub fn load_or_create() -> Result<Self> {
        match Self::load()? {
            Some(config) => Ok(config),
            None => Self::create(),
        }
    }

    /// Persist the identity with tight permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self) -> Result<()> {
        let dir = ensure_config_dir()?;
        let path = dir.join("config.json");
        let data =
            serde_json::to_string_pretty(self).context("failed to serialize PC config")?;
        fs::write(&path, data).context("failed to write PC config")?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(crate::constants::FILE_MODE))
            .context("failed to set PC config permissions")?;

        Ok(())
    }

    /// Add a paired mobile, replacing any existing entry with the same id.
    pub fn add_paired_mobile(&mut self, mobile: PairedMobile) {
        if let Some(existing) = self.paired_mobiles.iter_mut().find(|m| m.id == mobile.id) {
            *existing = mobile;
        } else {
            self.paired_mobiles.push(mobile);
        }
    }

    /// Remove a paired mobile by id. Returns whether anything was removed.
    pub fn remove_paired_mobile(&mut self, mobile_id: &str) -> bool {
        let before = self.paired_mobiles.len();
        self.paired_mobiles.retain(|m| m.id != mobile_id);
        self.paired_mobiles.len() != before
    }

    /// Look up a paired mobile by id.
    #[must_use]
    pub fn paired_mobile(&self, mobile_id: &str) -> Option<&PairedMobile> {
        self.paired_mobiles.iter().find(|m| m.id == mobile_id)
    }
}

/// Remembered agent choice for one working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryPreference {
    pub default_agent: String,
    pub last_used: String,
}

/// Map of absolute workdir path to preference. Missing entries are fine.
pub type DirectoriesConfig = BTreeMap<String, DirectoryPreference>;

/// Load the per-directory preferences, defaulting to empty.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed.
pub fn load_directories() -> Result<DirectoriesConfig> {
    let path = config_dir()?.join("directories.json");
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e).context("failed to read directories config"),
    };
    serde_json::from_str(&data).context("failed to parse directories config")
}

/// Return the remembered agent for a workdir, if any.
#[must_use]
pub fn directory_agent(workdir: &str) -> Option<String> {
    load_directories()
        .ok()?
        .get(workdir)
        .map(|p| p.default_agent.clone())
}

/// Remember the agent choice for a workdir.
///
/// # Errors
///
/// Returns an error if the preferences cannot be written.
pub fn set_directory_agent(workdir: &str, agent: &str) -> Result<()> {
    let mut config = load_directories()?;
    config.insert(
        workdir.to_string(),
        DirectoryPreference {
            default_agent: agent.to_string(),
            last_used: chrono::Utc::now().to_rfc3339(),
        },
    );

    let dir = ensure_config_dir()?;
    let data = serde_json::to_string_pretty(&config)
        .context("failed to serialize directories config")?;
    fs::write(dir.join("directories.json"), data)
        .context("failed to write directories config")?;
    Ok(())
}

/// Resolve the config directory without creating it.
///
/// # Errors
///
/// Returns an error if no config location can be determined.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("AIPILOT_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("cannot determine config directory")?;
    Ok(base.join("aipilot"))
}

fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir).context("failed to create config directory")?;

    #[cfg(unix)]
    fs::set_permissions(&dir, fs::Permissions::from_mode(crate::constants::DIR_MODE))
        .context("failed to set config directory permissions")?;

    Ok(dir)
}
