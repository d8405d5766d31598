// Integration tests for the relay HTTP client against a canned local server.
// Run with: cargo test --test relay_api_test

use aipilot::relay::RelayClient;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;

/// A one-request HTTP server that captures the request head+body and
/// answers with a fixed status and JSON body.
struct CannedServer {
    base_url: String,
    request_rx: mpsc::Receiver<String>,
}

impl CannedServer {
    fn start(status_line: &'static str, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };

            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                raw.extend_from_slice(&buf[..n]);
                if let Some(header_end) = find_header_end(&raw) {
                    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
                    let content_length = content_length_of(&head);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let _ = request_tx.send(String::from_utf8_lossy(&raw).into_owned());

            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        });

        Self {
            base_url: format!("ws://{addr}"),
            request_rx,
        }
    }

    fn client(&self) -> RelayClient {
        RelayClient::new(&self.base_url, "test-pc").unwrap()
    }

    fn captured_request(&self) -> String {
        self.request_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("server saw a request")
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length_of(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_delete_session_success() {
    let server = CannedServer::start("HTTP/1.1 200 OK", r#"{"success":true}"#);
    let client = server.client();

    client.delete_session("session-123").await.unwrap();

    let request = server.captured_request();
    assert!(request.starts_with("DELETE /api/sessions/session-123 "));
    assert!(request.to_ascii_lowercase().contains("x-pc-id: test-pc"));
}

#[tokio::test]
async fn test_delete_session_not_found_surfaces_body() {
    let server = CannedServer::start("HTTP/1.1 404 Not Found", r#"{"error":"not found"}"#);
    let client = server.client();

    let err = client.delete_session("session-404").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("404"), "got: {message}");
    assert!(message.contains("not found"), "got: {message}");
}

#[tokio::test]
async fn test_list_all_sessions_requests_cli_scope() {
    let server = CannedServer::start(
        "HTTP/1.1 200 OK",
        r#"[{"id":"s1","agent_type":"claude","working_dir":"/dir1","token":"tok1"},
            {"id":"s2","agent_type":"gemini","working_dir":"/dir2","token":"tok2"}]"#,
    );
    let client = server.client();

    let sessions = client.list_all_sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "s1");
    assert_eq!(sessions[0].token, "tok1");
    assert_eq!(sessions[1].agent_type, "gemini");

    let request = server.captured_request();
    assert!(request.contains("for_cli=true"), "got: {request}");
}

#[tokio::test]
async fn test_add_session_token_for_mobile() {
    let server = CannedServer::start("HTTP/1.1 200 OK", r#"{"success":true}"#);
    let client = server.client();

    client
        .add_session_token_for_mobile("session-1", "mob-1", "enc-tok")
        .await
        .unwrap();

    let request = server.captured_request();
    assert!(request.starts_with("POST /api/sessions/session-1/tokens "));
    assert!(request.contains(r#""mobile_id":"mob-1""#));
    assert!(request.contains(r#""encrypted_token":"enc-tok""#));
}

#[tokio::test]
async fn test_purge_all_sessions_returns_count() {
    let server = CannedServer::start(
        "HTTP/1.1 200 OK",
        r#"{"success":true,"deleted_count":3}"#,
    );
    let client = server.client();

    let count = client.purge_all_sessions().await.unwrap();
    assert_eq!(count, 3);

    let request = server.captured_request();
    assert!(request.starts_with("DELETE /api/sessions "));
}

#[tokio::test]
async fn test_create_session_echoes_local_token() {
    let server = CannedServer::start(
        "HTTP/1.1 201 Created",
        r#"{"session_id":"srv-session","token":"server-chosen"}"#,
    );
    let client = server.client();

    let mut wrapped = HashMap::new();
    wrapped.insert("mob-1".to_string(), "deadbeef".to_string());

    let created = client
        .create_session("claude", "/work/api", "api", None, &wrapped, "local-token")
        .await
        .unwrap();

    // The relay's token is ignored: the AEAD must match the wrapped copies.
    assert_eq!(created.session_id, "srv-session");
    assert_eq!(created.token, "local-token");

    let request = server.captured_request();
    assert!(request.contains(r#""pc_id":"test-pc""#));
    assert!(request.contains(r#""agent_type":"claude""#));
    assert!(request.contains(r#""mob-1":"deadbeef""#));
}

#[tokio::test]
async fn test_init_pairing_sends_identity() {
    let server = CannedServer::start(
        "HTTP/1.1 200 OK",
        r#"{"token":"pair-tok","expires_at":"2026-08-02T12:00:00Z"}"#,
    );
    let client = server.client();

    let pairing = client.init_pairing("my-pc", "aabbcc").await.unwrap();
    assert_eq!(pairing.token, "pair-tok");
    assert_eq!(pairing.expires_at, "2026-08-02T12:00:00Z");

    let request = server.captured_request();
    assert!(request.starts_with("POST /api/pairing/init "));
    assert!(request.contains(r#""pc_name":"my-pc""#));
    assert!(request.contains(r#""public_key":"aabbcc""#));
}

#[tokio::test]
async fn test_check_pairing_status_completed() {
    let server = CannedServer::start(
        "HTTP/1.1 200 OK",
        r#"{"status":"completed","mobile_id":"m1","mobile_name":"Phone","public_key":"kk"}"#,
    );
    let client = server.client();

    let status = client.check_pairing_status("pair-tok").await.unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.mobile_id.as_deref(), Some("m1"));

    let request = server.captured_request();
    assert!(request.contains("token=pair-tok"), "got: {request}");
}

#[tokio::test]
async fn test_unpair_mobile() {
    let server = CannedServer::start("HTTP/1.1 204 No Content", "");
    let client = server.client();

    client.unpair_mobile("mob-9").await.unwrap();

    let request = server.captured_request();
    assert!(request.starts_with("DELETE /api/pairing/mobiles/mob-9 "));
}
