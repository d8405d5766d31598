//! HTTP client for the relay API.
//!
//! Pairing, session, and mobile-management endpoints. The client converts
//! the `ws(s)://` relay base to `http(s)://`, stamps every request with
//! `X-PC-ID`, and surfaces non-2xx bodies verbatim to the caller. It does
//! no retrying — retry policy belongs to call sites.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::HTTP_TIMEOUT;
use crate::sshinfo::SshInfo;
use crate::ws;

/// Response from `POST /api/pairing/init`.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingInitResponse {
    pub token: String,
    pub expires_at: String,
}

/// Response from `GET /api/pairing/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingStatusResponse {
    /// `pending`, `completed`, or `expired`.
    pub status: String,
    #[serde(default)]
    pub mobile_id: Option<String>,
    #[serde(default)]
    pub mobile_name: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Response from `POST /api/sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub token: String,
}

/// One session as returned by the CLI-scoped listing (includes the
/// plaintext token).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct PairingInitRequest<'a> {
    pc_id: &'a str,
    pc_name: &'a str,
    public_key: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    pc_id: &'a str,
    agent_type: &'a str,
    working_dir: &'a str,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_info: Option<&'a SshInfo>,
    encrypted_tokens: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    #[serde(alias = "deletedCount")]
    deleted_count: usize,
}

/// Relay API client bound to one PC identity.
#[derive(Debug, Clone)]
pub struct RelayClient {
    base_url: String,
    http: reqwest::Client,
    pc_id: String,
}

impl RelayClient {
    /// Build a client for a `ws(s)://` relay base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(relay_url: &str, pc_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: ws::ws_to_http_scheme(relay_url),
            http,
            pc_id: pc_id.to_string(),
        })
    }

    /// Initiate a pairing; the returned token goes into the QR code.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn init_pairing(
        &self,
        pc_name: &str,
        public_key: &str,
    ) -> Result<PairingInitResponse> {
        let request = PairingInitRequest {
            pc_id: &self.pc_id,
            pc_name,
            public_key,
        };
        let response = self
            .http
            .post(format!("{}/api/pairing/init", self.base_url))
            .header("X-PC-ID", &self.pc_id)
            .json(&request)
            .send()
            .await
            .context("failed to reach relay")?;
        Self::checked(response, "pairing init").await?.json().await
            .context("failed to parse pairing init response")
    }

    /// Poll whether a pairing token has been claimed.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn check_pairing_status(&self, token: &str) -> Result<PairingStatusResponse> {
        let response = self
            .http
            .get(format!("{}/api/pairing/status", self.base_url))
            .query(&[("token", token)])
            .header("X-PC-ID", &self.pc_id)
            .send()
            .await
            .context("failed to reach relay")?;
        Self::checked(response, "pairing status check")
            .await?
            .json()
            .await
            .context("failed to parse pairing status response")
    }

    /// Register a session. `token` is generated locally (it seeds the AEAD
    /// and was wrapped per mobile into `encrypted_tokens`); the response
    /// echoes it back so callers always use the local value.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn create_session(
        &self,
        agent_type: &str,
        working_dir: &str,
        display_name: &str,
        ssh_info: Option<&SshInfo>,
        encrypted_tokens: &HashMap<String, String>,
        token: &str,
    ) -> Result<CreateSessionResponse> {
        let request = CreateSessionRequest {
            pc_id: &self.pc_id,
            agent_type,
            working_dir,
            display_name,
            ssh_info,
            encrypted_tokens,
        };
        let response = self
            .http
            .post(format!("{}/api/sessions", self.base_url))
            .header("X-PC-ID", &self.pc_id)
            .json(&request)
            .send()
            .await
            .context("failed to create session")?;
        let mut created: CreateSessionResponse = Self::checked(response, "session creation")
            .await?
            .json()
            .await
            .context("failed to parse session creation response")?;
        created.token = token.to_string();
        Ok(created)
    }

    /// Attach a wrapped session token for a newly paired mobile.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn add_session_token_for_mobile(
        &self,
        session_id: &str,
        mobile_id: &str,
        wrapped_token: &str,
    ) -> Result<()> {
        let mut body = HashMap::new();
        body.insert("mobile_id", mobile_id);
        body.insert("encrypted_token", wrapped_token);

        let response = self
            .http
            .post(format!("{}/api/sessions/{session_id}/tokens", self.base_url))
            .header("X-PC-ID", &self.pc_id)
            .json(&body)
            .send()
            .await
            .context("failed to add session token")?;
        Self::checked(response, "add session token").await?;
        Ok(())
    }

    /// Delete one session.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/api/sessions/{session_id}", self.base_url))
            .header("X-PC-ID", &self.pc_id)
            .send()
            .await
            .context("failed to delete session")?;
        Self::checked(response, "session deletion").await?;
        Ok(())
    }

    /// Delete every session owned by this PC. Returns the deleted count.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn purge_all_sessions(&self) -> Result<usize> {
        let response = self
            .http
            .delete(format!("{}/api/sessions", self.base_url))
            .header("X-PC-ID", &self.pc_id)
            .send()
            .await
            .context("failed to purge sessions")?;
        let purged: PurgeResponse = Self::checked(response, "session purge")
            .await?
            .json()
            .await
            .context("failed to parse purge response")?;
        Ok(purged.deleted_count)
    }

    /// List this PC's sessions in the CLI-scoped form (tokens included).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn list_all_sessions(&self) -> Result<Vec<SessionInfo>> {
        let response = self
            .http
            .get(format!("{}/api/sessions", self.base_url))
            .query(&[("for_cli", "true")])
            .header("X-PC-ID", &self.pc_id)
            .send()
            .await
            .context("failed to list sessions")?;
        Self::checked(response, "session listing")
            .await?
            .json()
            .await
            .context("failed to parse session listing")
    }

    /// Remove a paired mobile on the relay side.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn unpair_mobile(&self, mobile_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/api/pairing/mobiles/{mobile_id}", self.base_url))
            .header("X-PC-ID", &self.pc_id)
            .send()
            .await
            .context("failed to unpair mobile")?;
        Self::checked(response, "unpair").await?;
        Ok(())
    }

    async fn checked(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{what} failed: {status} - {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_converted_to_http() {
        let client = RelayClient::new("wss://relay.example.com", "pc-1").unwrap();
        assert_eq!(client.base_url, "https://relay.example.com");

        let client = RelayClient::new("ws://localhost:8787", "pc-1").unwrap();
        assert_eq!(client.base_url, "http://localhost:8787");
    }

    #[test]
    fn test_purge_response_accepts_both_key_styles() {
        let snake: PurgeResponse =
            serde_json::from_str(r#"{"success":true,"deleted_count":3}"#).unwrap();
        assert_eq!(snake.deleted_count, 3);

        let camel: PurgeResponse =
            serde_json::from_str(r#"{"success":true,"deletedCount":2}"#).unwrap();
        assert_eq!(camel.deleted_count, 2);
    }

    #[test]
    fn test_session_info_tolerates_missing_fields() {
        let info: SessionInfo = serde_json::from_str(r#"{"id":"s1"}"#).unwrap();
        assert_eq!(info.id, "s1");
        assert!(info.token.is_empty());
    }

    #[test]
    fn test_create_session_request_shape() {
        let tokens: HashMap<String, String> =
            [("m1".to_string(), "deadbeef".to_string())].into();
        let request = CreateSessionRequest {
            pc_id: "pc-1",
            agent_type: "claude",
            working_dir: "/work",
            display_name: "work",
            ssh_info: None,
            encrypted_tokens: &tokens,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["pc_id"], "pc-1");
        assert_eq!(json["encrypted_tokens"]["m1"], "deadbeef");
        assert!(json.get("ssh_info").is_none());
    }
}
