//! Wire types shared with the relay and the mobile app.
//!
//! The WebSocket leg speaks a single JSON envelope; the pairing QR encodes
//! [`PairingQrData`]. Field names are part of the wire contract — do not
//! rename without coordinating a mobile release.

use serde::{Deserialize, Serialize};

/// JSON envelope for every WebSocket frame in both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Base64 of `nonce12 ‖ aes_gcm_ciphertext_with_tag` for `data` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// An envelope carrying only a frame type.
    #[must_use]
    pub fn of_kind(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    /// A `data` envelope with an encrypted payload.
    #[must_use]
    pub fn data(payload: String) -> Self {
        Self {
            kind: "data".to_string(),
            payload: Some(payload),
            ..Self::default()
        }
    }
}

/// Payload encoded in the pairing QR code. Short keys keep the QR small
/// enough to render in a terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingQrData {
    /// Always `"pairing"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "r")]
    pub relay: String,
    #[serde(rename = "t")]
    pub token: String,
    #[serde(rename = "pc")]
    pub pc_id: String,
    #[serde(rename = "n")]
    pub pc_name: String,
    #[serde(rename = "k")]
    pub public_key: String,
    // Session info included when a session is live, so the mobile can show
    // it immediately even if the paired notification is missed.
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "wd", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(rename = "at", skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(rename = "sa", skip_serializing_if = "Option::is_none")]
    pub ssh_available: Option<bool>,
    #[serde(rename = "sp", skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    #[serde(rename = "h", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(rename = "u", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_omits_empty_fields() {
        let json = serde_json::to_string(&Envelope::of_kind("ping")).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_envelope_data_frame() {
        let json = serde_json::to_string(&Envelope::data("abc=".into())).unwrap();
        assert_eq!(json, r#"{"type":"data","payload":"abc="}"#);
    }

    #[test]
    fn test_envelope_parses_registration_and_resize_fields() {
        let env: Envelope = serde_json::from_str(r#"{"type":"registered"}"#).unwrap();
        assert_eq!(env.kind, "registered");

        let env: Envelope = serde_json::from_str(
            r#"{"type":"connected","role":"mobile","cols":90,"rows":40}"#,
        )
        .unwrap();
        assert_eq!(env.role.as_deref(), Some("mobile"));
        assert_eq!((env.cols, env.rows), (Some(90), Some(40)));
    }

    #[test]
    fn test_envelope_ignores_unknown_fields() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"pong","extra":"future"}"#).unwrap();
        assert_eq!(env.kind, "pong");
    }

    #[test]
    fn test_pairing_qr_uses_short_keys() {
        let qr = PairingQrData {
            kind: "pairing".into(),
            relay: "wss://r".into(),
            token: "tok".into(),
            pc_id: "id".into(),
            pc_name: "pc".into(),
            public_key: "key".into(),
            session_id: None,
            working_dir: None,
            agent_type: None,
            ssh_available: None,
            ssh_port: None,
            hostname: None,
            username: None,
        };
        let json = serde_json::to_string(&qr).unwrap();
        assert!(json.contains(r#""r":"wss://r""#));
        assert!(json.contains(r#""pc":"id""#));
        assert!(!json.contains("session_id"));
    }
}
