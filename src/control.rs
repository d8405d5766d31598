//! Control-channel codec.
//!
//! Control frames ride inside the encrypted data stream, distinguished from
//! terminal bytes by a leading NUL followed by the literal `CTRL:` — real
//! terminal output never legitimately starts with 0x00. The rest of the
//! frame is a colon-separated ASCII verb plus arguments.
//!
//! Unknown verbs parse to [`ControlMessage::Unknown`] and are ignored by the
//! dispatcher, which keeps older bridges compatible with newer mobiles.

/// Sentinel prefix for control frames inside the data stream.
pub const CONTROL_PREFIX: &[u8] = b"\x00CTRL:";

/// A control frame received from the mobile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Mobile viewport changed: `resize:<cols>,<rows>`.
    Resize { cols: u16, rows: u16 },
    /// Mobile asks for host info: `info-request`.
    InfoRequest,
    /// Mobile describes itself: `mobile-info:<json>`.
    MobileInfo { json: String },
    /// Provision an SSH key: `ssh-setup-key:<user>:<mobile_id>:<base64>`.
    SshSetupKey {
        username: String,
        mobile_id: String,
        key_base64: String,
    },
    /// Single-frame upload: `file-upload:<name>:<base64>`.
    FileUpload {
        file_name: String,
        data_base64: String,
    },
    /// Malformed single-frame upload — answered with an error result.
    FileUploadInvalid,
    /// Chunked upload announcement:
    /// `file-upload-start:<id>:<name>:<total_chunks>:<total_size>`.
    FileUploadStart {
        upload_id: String,
        file_name: String,
        total_chunks: usize,
        total_size: u64,
    },
    /// One chunk: `file-upload-chunk:<id>:<index>:<base64>`.
    FileUploadChunk {
        upload_id: String,
        index: usize,
        data_base64: String,
    },
    /// Abort an in-flight upload: `file-upload-cancel:<id>`.
    FileUploadCancel { upload_id: String },
    /// Verb this bridge does not know. Ignored.
    Unknown { verb: String },
}

/// Whether a decrypted payload is a control frame.
#[must_use]
pub fn is_control_frame(data: &[u8]) -> bool {
    data.len() > CONTROL_PREFIX.len() && data.starts_with(CONTROL_PREFIX)
}

/// Parse a decrypted payload into a control message.
///
/// Returns `None` for non-control payloads and for malformed argument lists
/// of known verbs (which are dropped silently, except uploads — see
/// [`ControlMessage::FileUploadInvalid`]).
#[must_use]
pub fn parse(data: &[u8]) -> Option<ControlMessage> {
    if !is_control_frame(data) {
        return None;
    }
    let body = std::str::from_utf8(&data[CONTROL_PREFIX.len()..]).ok()?;
    let (verb, args) = match body.split_once(':') {
        Some((verb, args)) => (verb, args),
        None => (body, ""),
    };

    match verb {
        "resize" => {
            let (cols, rows) = args.split_once(',')?;
            let cols: u16 = cols.trim().parse().ok()?;
            let rows: u16 = rows.trim().parse().ok()?;
            if cols == 0 || rows == 0 {
                return None;
            }
            Some(ControlMessage::Resize { cols, rows })
        }
        "info-request" => Some(ControlMessage::InfoRequest),
        "mobile-info" => Some(ControlMessage::MobileInfo {
            json: args.to_string(),
        }),
        "ssh-setup-key" => {
            // Only the three-part form carries a mobile id; the old
            // two-part form is ambiguous and dropped as malformed.
            let mut parts = args.splitn(3, ':');
            let username = parts.next()?.to_string();
            let mobile_id = parts.next()?.to_string();
            let key_base64 = parts.next()?.to_string();
            Some(ControlMessage::SshSetupKey {
                username,
                mobile_id,
                key_base64,
            })
        }
        "file-upload" => match args.split_once(':') {
            Some((file_name, data_base64)) => Some(ControlMessage::FileUpload {
                file_name: file_name.to_string(),
                data_base64: data_base64.to_string(),
            }),
            None => Some(ControlMessage::FileUploadInvalid),
        },
        "file-upload-start" => {
            let mut parts = args.splitn(4, ':');
            let upload_id = parts.next()?.to_string();
            let file_name = parts.next()?.to_string();
            let total_chunks: usize = parts.next()?.trim().parse().ok()?;
            let total_size: u64 = parts.next()?.trim().parse().ok()?;
            Some(ControlMessage::FileUploadStart {
                upload_id,
                file_name,
                total_chunks,
                total_size,
            })
        }
        "file-upload-chunk" => {
            let mut parts = args.splitn(3, ':');
            let upload_id = parts.next()?.to_string();
            let index: usize = parts.next()?.trim().parse().ok()?;
            let data_base64 = parts.next()?.to_string();
            Some(ControlMessage::FileUploadChunk {
                upload_id,
                index,
                data_base64,
            })
        }
        "file-upload-cancel" => {
            if args.is_empty() {
                return None;
            }
            Some(ControlMessage::FileUploadCancel {
                upload_id: args.to_string(),
            })
        }
        other => Some(ControlMessage::Unknown {
            verb: other.to_string(),
        }),
    }
}

/// Frame an outbound control payload (`mode:pc`, `file-upload-ack:…`, …)
/// for the encrypted data stream.
#[must_use]
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CONTROL_PREFIX.len() + payload.len());
    frame.extend_from_slice(CONTROL_PREFIX);
    frame.extend_from_slice(payload.as_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_bytes_are_not_control() {
        assert!(!is_control_frame(b"ls -la\r"));
        assert!(!is_control_frame(b"CTRL:resize:80,24"));
        assert!(!is_control_frame(b"\x00CTRL:"));
        assert_eq!(parse(b"plain input"), None);
    }

    #[test]
    fn test_parse_resize() {
        assert_eq!(
            parse(b"\x00CTRL:resize:132,43"),
            Some(ControlMessage::Resize {
                cols: 132,
                rows: 43
            })
        );
    }

    #[test]
    fn test_resize_rejects_bad_dims() {
        assert_eq!(parse(b"\x00CTRL:resize:132"), None);
        assert_eq!(parse(b"\x00CTRL:resize:0,43"), None);
        assert_eq!(parse(b"\x00CTRL:resize:abc,43"), None);
    }

    #[test]
    fn test_parse_info_and_mobile_info() {
        assert_eq!(
            parse(b"\x00CTRL:info-request"),
            Some(ControlMessage::InfoRequest)
        );
        let frame = encode_frame(r#"mobile-info:{"appVersion":"2.1"}"#);
        assert_eq!(
            parse(&frame),
            Some(ControlMessage::MobileInfo {
                json: r#"{"appVersion":"2.1"}"#.to_string()
            })
        );
    }

    #[test]
    fn test_parse_ssh_setup_key_three_part_only() {
        assert_eq!(
            parse(b"\x00CTRL:ssh-setup-key:alice:m-1:c3NoLXJzYQ=="),
            Some(ControlMessage::SshSetupKey {
                username: "alice".into(),
                mobile_id: "m-1".into(),
                key_base64: "c3NoLXJzYQ==".into(),
            })
        );
        // Legacy two-part form has no mobile id — dropped
        assert_eq!(parse(b"\x00CTRL:ssh-setup-key:alice:c3NoLXJzYQ=="), None);
    }

    #[test]
    fn test_parse_upload_frames() {
        assert_eq!(
            parse(b"\x00CTRL:file-upload-start:u1:hi.txt:2:9"),
            Some(ControlMessage::FileUploadStart {
                upload_id: "u1".into(),
                file_name: "hi.txt".into(),
                total_chunks: 2,
                total_size: 9,
            })
        );
        assert_eq!(
            parse(b"\x00CTRL:file-upload-chunk:u1:1:d29ybGQ="),
            Some(ControlMessage::FileUploadChunk {
                upload_id: "u1".into(),
                index: 1,
                data_base64: "d29ybGQ=".into(),
            })
        );
        assert_eq!(
            parse(b"\x00CTRL:file-upload-cancel:u1"),
            Some(ControlMessage::FileUploadCancel {
                upload_id: "u1".into()
            })
        );
    }

    #[test]
    fn test_single_frame_upload_and_invalid_form() {
        assert_eq!(
            parse(b"\x00CTRL:file-upload:notes.md:aGk="),
            Some(ControlMessage::FileUpload {
                file_name: "notes.md".into(),
                data_base64: "aGk=".into(),
            })
        );
        assert_eq!(
            parse(b"\x00CTRL:file-upload:missing-data"),
            Some(ControlMessage::FileUploadInvalid)
        );
    }

    #[test]
    fn test_unknown_verb_is_explicit() {
        assert_eq!(
            parse(b"\x00CTRL:clipboard-sync:abc"),
            Some(ControlMessage::Unknown {
                verb: "clipboard-sync".into()
            })
        );
    }

    #[test]
    fn test_encode_frame_roundtrips_through_parse() {
        let frame = encode_frame("resize:80,24");
        assert!(is_control_frame(&frame));
        assert_eq!(
            parse(&frame),
            Some(ControlMessage::Resize { cols: 80, rows: 24 })
        );
    }
}
