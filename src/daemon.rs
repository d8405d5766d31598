//! The bridge orchestrator.
//!
//! Owns the PTY, the WebSocket session, the AEAD state, and the viewport,
//! and wires the long-lived tasks together:
//!
//! ```text
//!            ┌─────────── stdin ────────────┐
//!            ▼                              │
//!  local TTY ──► line interceptor ──► PTY ──┼──► stdout (local TTY)
//!                                           └──► cipher ──► WS ──► mobile
//!  mobile ──► WS ──► cipher ──► control dispatch
//!                           └──► line interceptor ──► PTY
//! ```
//!
//! Locking: the daemon state sits behind one `RwLock`; WebSocket writes are
//! serialized by their own mutex (the library forbids concurrent writes);
//! PTY write/resize/size share the PTY mutex. Lock holders never perform
//! I/O — decisions are made under the lock, I/O happens after release.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::agents::AgentType;
use crate::commands::MetaCommand;
use crate::config::{PairedMobile, PcConfig};
use crate::constants::{
    PAIRING_POLL_INTERVAL, PAIRING_SUCCESS_PAUSE, PAIRING_TIMEOUT, PC_SWITCH_DEBOUNCE,
    PING_INTERVAL, RECONNECT_DELAY, REDRAW_NUDGE_DELAY, RELAY_CONNECT_DELAY,
    UPLOAD_CLEANUP_INTERVAL, UPLOAD_TIMEOUT, VERSION,
};
use crate::control::{self, ControlMessage};
use crate::crypto::{self, SessionCipher};
use crate::interceptor::{ByteOutcome, LineInterceptor};
use crate::protocol::{Envelope, PairingQrData};
use crate::pty::PtyManager;
use crate::relay::RelayClient;
use crate::session::{self, SessionData};
use crate::terminal::{self, style};
use crate::upload::{ChunkOutcome, UploadStore};
use crate::viewport::{ActiveClient, Viewport};
use crate::{info, qr, sshinfo, update, upload, ws};

const CTRL_C: u8 = 0x03;
const CTRL_L: u8 = 0x0c;
const CTRL_U: u8 = 0x15;
const ESC: u8 = 0x1b;

/// Static configuration the daemon is built with.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub relay_url: String,
    pub command: String,
    pub workdir: String,
    pub agent_type: AgentType,
    /// Accept plain-base64 frames from pre-encryption mobile builds.
    pub legacy_plaintext: bool,
}

/// Mutable state behind the daemon-wide lock.
#[derive(Debug)]
struct DaemonState {
    session: String,
    token: String,
    relay_connected: bool,
    mobile_connected: bool,
    running: bool,
    viewport: Viewport,
}

/// The bridge runtime. Construct with [`Daemon::new`], then spawn the task
/// set from `main`.
pub struct Daemon {
    state: tokio::sync::RwLock<DaemonState>,
    ws_writer: tokio::sync::Mutex<Option<ws::WsWriter>>,
    cipher: std::sync::RwLock<SessionCipher>,
    pty: PtyManager,
    uploads: UploadStore,
    relay_client: RelayClient,
    config: std::sync::Mutex<PcConfig>,
    mobile_interceptor: std::sync::Mutex<LineInterceptor>,
    opts: DaemonOptions,
    pc_id: String,
    /// Debounce generation for the PC switch: bump to re-arm, a sleeper
    /// fires only if its generation is still current.
    pc_switch_gen: AtomicU64,
    upload_gc_started: AtomicBool,
    /// While the pairing screen is up, stdin bytes are routed here instead
    /// of the interceptor.
    qr_router: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Daemon {
    /// Build the daemon around an already-spawned PTY and session record.
    pub fn new(
        opts: DaemonOptions,
        config: PcConfig,
        relay_client: RelayClient,
        session_id: String,
        token: String,
        pty: PtyManager,
    ) -> Arc<Self> {
        let cipher = SessionCipher::new(&token, opts.legacy_plaintext);
        let pc_id = config.pc_id.clone();
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            state: tokio::sync::RwLock::new(DaemonState {
                session: session_id,
                token,
                relay_connected: false,
                mobile_connected: false,
                running: true,
                viewport: Viewport::new(),
            }),
            ws_writer: tokio::sync::Mutex::new(None),
            cipher: std::sync::RwLock::new(cipher),
            pty,
            uploads: UploadStore::new(),
            relay_client,
            config: std::sync::Mutex::new(config),
            mobile_interceptor: std::sync::Mutex::new(LineInterceptor::new()),
            opts,
            pc_id,
            pc_switch_gen: AtomicU64::new(0),
            upload_gc_started: AtomicBool::new(false),
            qr_router: std::sync::Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Receiver that flips to `true` when shutdown is requested.
    #[must_use]
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Ask every task to wind down. `main` runs the cleanup afterwards.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Seed the PC viewport from the controlling TTY and make it active.
    pub async fn seed_pc_viewport(&self, cols: u16, rows: u16) {
        let mut state = self.state.write().await;
        state.viewport.set_pc(cols, rows);
        state.viewport.force_active(ActiveClient::Pc);
    }

    pub async fn is_mobile_connected(&self) -> bool {
        self.state.read().await.mobile_connected
    }

    /// Which client the PTY winsize currently tracks.
    pub async fn current_client(&self) -> Option<ActiveClient> {
        self.state.read().await.viewport.current()
    }

    /// Current PTY winsize as `(cols, rows)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the size query fails.
    pub fn pty_size(&self) -> Result<(u16, u16)> {
        self.pty.size()
    }

    async fn set_mobile_connected(&self, connected: bool) {
        self.state.write().await.mobile_connected = connected;
    }

    // ── Outbound path ───────────────────────────────────────────────────────

    async fn ws_send(&self, envelope: &Envelope) -> Result<()> {
        let text = serde_json::to_string(envelope)?;
        let mut writer = self.ws_writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.send_text(&text).await,
            None => anyhow::bail!("relay not connected"),
        }
    }

    /// Encrypt and forward bytes to the mobile. Silently dropped while no
    /// mobile is attached.
    pub async fn send_to_mobile(&self, data: &[u8]) {
        let connected = {
            let state = self.state.read().await;
            state.relay_connected && state.mobile_connected
        };
        if !connected {
            return;
        }

        let encrypted = {
            let cipher = self.cipher.read().unwrap_or_else(|e| e.into_inner());
            match cipher.encrypt(data) {
                Ok(encrypted) => encrypted,
                Err(e) => {
                    log::warn!("dropping outbound frame: {e}");
                    return;
                }
            }
        };
        if let Err(e) = self.ws_send(&Envelope::data(encrypted)).await {
            log::debug!("mobile send failed: {e}");
        }
    }

    /// Send a control payload (`mode:pc`, `file-upload-ack:…`) to the
    /// mobile through the encrypted data stream.
    pub async fn send_control(&self, payload: &str) {
        let frame = control::encode_frame(payload);
        self.send_to_mobile(&frame).await;
    }

    /// Write bytes into the agent's PTY.
    pub fn send_to_pty(&self, data: &[u8]) {
        if let Err(e) = self.pty.write(data) {
            log::debug!("PTY write failed: {e}");
        }
    }

    // ── Viewport ────────────────────────────────────────────────────────────

    /// Switch the PTY winsize to `target`'s dimensions. No-op when the
    /// target is active already or its size is unknown.
    pub async fn switch_to_client(self: &Arc<Self>, target: ActiveClient) {
        let plan = {
            let mut state = self.state.write().await;
            state.viewport.plan_switch(target)
        };
        let Some(size) = plan else { return };

        if let Err(e) = self.pty.resize(size.cols, size.rows) {
            log::warn!("viewport resize failed: {e}");
        }

        if target == ActiveClient::Mobile {
            self.schedule_redraw_nudge();
        }
        self.send_control(&format!("mode:{target}")).await;
    }

    /// One Ctrl+L after a short delay so the agent repaints at the new size.
    fn schedule_redraw_nudge(self: &Arc<Self>) {
        let daemon = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REDRAW_NUDGE_DELAY).await;
            daemon.send_to_pty(&[CTRL_L]);
        });
    }

    /// Arm (or re-arm) the debounced switch back to PC dimensions. Each
    /// local printable keystroke resets the timer; the switch happens only
    /// after a quiet period.
    pub async fn schedule_pc_switch(self: &Arc<Self>) {
        {
            let state = self.state.read().await;
            if state.viewport.current() == Some(ActiveClient::Pc) {
                return;
            }
        }

        let armed = self.pc_switch_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let daemon = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PC_SWITCH_DEBOUNCE).await;
            if daemon.pc_switch_gen.load(Ordering::SeqCst) == armed {
                daemon.switch_to_client(ActiveClient::Pc).await;
            }
        });
    }

    async fn handle_resize_control(self: &Arc<Self>, cols: u16, rows: u16) {
        let already_mobile = {
            let mut state = self.state.write().await;
            state.viewport.set_mobile(cols, rows);
            state.viewport.current() == Some(ActiveClient::Mobile)
        };

        if already_mobile {
            // Same client, fresh dimensions — apply without a transition.
            if let Err(e) = self.pty.resize(cols, rows) {
                log::warn!("mobile resize failed: {e}");
            }
            self.schedule_redraw_nudge();
        } else {
            self.switch_to_client(ActiveClient::Mobile).await;
        }
    }

    /// React to a local terminal resize (window-change signal).
    pub async fn handle_pc_winch(&self, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        let apply = {
            let mut state = self.state.write().await;
            state.viewport.set_pc(cols, rows);
            let on_pc = matches!(state.viewport.current(), None | Some(ActiveClient::Pc));
            if on_pc {
                state.viewport.force_active(ActiveClient::Pc);
            }
            on_pc
        };
        if apply {
            if let Err(e) = self.pty.resize(cols, rows) {
                log::warn!("PC resize failed: {e}");
            }
        }
    }

    // ── Relay connection ────────────────────────────────────────────────────

    /// Dial loop: connect, register, read until failure, reconnect forever.
    ///
    /// Once a socket has registered, the relay is assumed to drop the
    /// session record on disconnect — the next epoch re-creates the session
    /// (retrying at 5 s) before redialing.
    pub async fn run_relay_loop(self: Arc<Self>) {
        let mut shutdown = self.subscribe_shutdown();
        let mut was_connected = false;

        loop {
            if *shutdown.borrow() {
                return;
            }

            if was_connected {
                was_connected = false;
                loop {
                    match self.recreate_session().await {
                        Ok(()) => break,
                        Err(e) => {
                            log::warn!("session re-creation failed: {e}");
                            if sleep_or_shutdown(RELAY_CONNECT_DELAY, &mut shutdown).await {
                                return;
                            }
                        }
                    }
                }
            }

            let session = self.state.read().await.session.clone();
            let url = format!(
                "{}/ws/{}?role=bridge&pc_id={}",
                self.opts.relay_url, session, self.pc_id
            );

            let (writer, mut reader) = match ws::connect(&url).await {
                Ok(pair) => pair,
                Err(e) => {
                    log::debug!("relay dial failed: {e}");
                    self.state.write().await.relay_connected = false;
                    if sleep_or_shutdown(RELAY_CONNECT_DELAY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            // First frame must be the registration ack.
            let registered = matches!(
                reader.recv().await,
                Some(Ok(ws::WsMessage::Text(text)))
                    if serde_json::from_str::<Envelope>(&text)
                        .map(|env| env.kind == "registered")
                        .unwrap_or(false)
            );
            if !registered {
                log::debug!("relay registration not acknowledged");
                if sleep_or_shutdown(RELAY_CONNECT_DELAY, &mut shutdown).await {
                    return;
                }
                continue;
            }

            *self.ws_writer.lock().await = Some(writer);
            self.state.write().await.relay_connected = true;
            was_connected = true;
            log::info!("relay connected, session {session}");

            // Keepalive lives exactly as long as this socket.
            let ping = tokio::spawn(self.clone().ping_loop());
            self.read_loop(&mut reader, &mut shutdown).await;
            ping.abort();

            *self.ws_writer.lock().await = None;
            {
                let mut state = self.state.write().await;
                state.relay_connected = false;
                state.mobile_connected = false;
            }

            {
                let stopped = *shutdown.borrow();
                if stopped {
                    return;
                }
            }
            if sleep_or_shutdown(RECONNECT_DELAY, &mut shutdown).await {
                return;
            }
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(PING_INTERVAL).await;
            if !self.state.read().await.relay_connected {
                return;
            }
            if self.ws_send(&Envelope::of_kind("ping")).await.is_err() {
                return;
            }
        }
    }

    async fn read_loop(
        self: &Arc<Self>,
        reader: &mut ws::WsReader,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                message = reader.recv() => match message {
                    Some(Ok(ws::WsMessage::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(ws::WsMessage::Ping(data))) => {
                        let mut writer = self.ws_writer.lock().await;
                        if let Some(writer) = writer.as_mut() {
                            let _ = writer.send_pong(data).await;
                        }
                    }
                    Some(Ok(ws::WsMessage::Pong(_))) => {}
                    Some(Ok(ws::WsMessage::Close)) | Some(Err(_)) | None => return,
                },
            }
        }
    }

    /// Build a fresh session on the relay after the old one was discarded,
    /// then swap token, AEAD state, and the local resume record.
    async fn recreate_session(&self) -> Result<()> {
        let token = session::generate_token();
        let encrypted_tokens = self.wrap_tokens_for_paired(&token);
        let ssh = tokio::task::spawn_blocking(sshinfo::detect_ssh_info).await?;
        let display_name = display_name_of(&self.opts.workdir);

        let created = self
            .relay_client
            .create_session(
                &self.opts.agent_type.to_string(),
                &self.opts.workdir,
                &display_name,
                Some(&ssh),
                &encrypted_tokens,
                &token,
            )
            .await?;

        {
            let mut state = self.state.write().await;
            state.session = created.session_id.clone();
            state.token = created.token.clone();
        }
        *self.cipher.write().unwrap_or_else(|e| e.into_inner()) =
            SessionCipher::new(&created.token, self.opts.legacy_plaintext);

        if let Err(e) = session::save(
            &self.opts.workdir,
            &SessionData {
                session: created.session_id.clone(),
                token: created.token,
                relay: self.opts.relay_url.clone(),
                command: self.opts.command.clone(),
                workdir: self.opts.workdir.clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        ) {
            log::warn!("could not refresh local session file: {e}");
        }

        log::info!("session rotated to {}", created.session_id);
        Ok(())
    }

    /// Wrap a session token for every paired mobile that has a public key.
    fn wrap_tokens_for_paired(&self, token: &str) -> HashMap<String, String> {
        let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        let secret = match crypto::secret_key_from_hex(&config.private_key) {
            Ok(secret) => secret,
            Err(e) => {
                log::warn!("cannot load PC private key: {e}");
                return HashMap::new();
            }
        };

        let mut wrapped = HashMap::new();
        for mobile in &config.paired_mobiles {
            if mobile.public_key.is_empty() {
                continue;
            }
            match crypto::wrap_token_for_mobile(token, &mobile.public_key, &secret) {
                Ok(sealed) => {
                    wrapped.insert(mobile.id.clone(), sealed);
                }
                Err(e) => log::warn!("could not wrap token for {}: {e}", mobile.name),
            }
        }
        wrapped
    }

    // ── Inbound frames ──────────────────────────────────────────────────────

    async fn handle_frame(self: &Arc<Self>, text: &str) {
        let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
            return;
        };

        let kind = envelope.kind.clone();
        match kind.as_str() {
            "data" => {
                let Some(payload) = envelope.payload else { return };
                let decrypted = {
                    let cipher = self.cipher.read().unwrap_or_else(|e| e.into_inner());
                    cipher.decrypt(&payload)
                };
                match decrypted {
                    Ok(data) => self.handle_data(&data).await,
                    Err(e) => log::debug!("dropping undecryptable frame: {e}"),
                }
            }
            "connected" => {
                if envelope.role.as_deref() == Some("mobile") {
                    self.set_mobile_connected(true).await;
                    log::info!("mobile attached");
                }
            }
            "disconnected" => {
                self.set_mobile_connected(false).await;
                log::info!("mobile detached");
            }
            "mobile_paired" => self.handle_mobile_paired(envelope).await,
            "pong" => {}
            other => log::debug!("ignoring relay frame type {other}"),
        }
    }

    /// Process one decrypted `data` payload from the mobile: control frames
    /// are dispatched, anything else is terminal input.
    pub async fn handle_data(self: &Arc<Self>, data: &[u8]) {
        // Receiving data proves a mobile is attached, even if the relay
        // skipped the `connected` notification after our reconnect.
        if !self.is_mobile_connected().await {
            self.set_mobile_connected(true).await;
        }

        if control::is_control_frame(data) {
            if let Some(message) = control::parse(data) {
                self.dispatch_control(message).await;
            }
            return;
        }

        // Terminal input: the mobile is typing, track its viewport.
        self.switch_to_client(ActiveClient::Mobile).await;

        for &byte in data {
            let outcome = {
                let mut interceptor = self
                    .mobile_interceptor
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                interceptor.push(byte)
            };
            match outcome {
                ByteOutcome::Forward | ByteOutcome::ForwardPrintable => {
                    self.send_to_pty(&[byte]);
                }
                ByteOutcome::Intercept(command) => {
                    self.send_to_pty(&[CTRL_U]);
                    self.execute_meta_command(command).await;
                }
            }
        }
    }

    async fn handle_mobile_paired(self: &Arc<Self>, envelope: Envelope) {
        let (Some(id), Some(public_key)) = (envelope.mobile_id, envelope.public_key) else {
            return;
        };
        if id.is_empty() || public_key.is_empty() {
            return;
        }

        let mobile = PairedMobile {
            id,
            name: envelope.mobile_name.unwrap_or_default(),
            public_key,
            paired_at: chrono::Utc::now().to_rfc3339(),
        };
        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.add_paired_mobile(mobile.clone());
            if let Err(e) = config.save() {
                terminal::print_raw(&format!(
                    "{}Failed to save config: {e}{}\n",
                    style::RED,
                    style::RESET
                ));
            }
        }
        self.add_token_for_mobile(&mobile).await;
    }

    /// Attach a wrapped copy of the live session token for one mobile.
    async fn add_token_for_mobile(&self, mobile: &PairedMobile) -> bool {
        let (session_id, token) = {
            let state = self.state.read().await;
            (state.session.clone(), state.token.clone())
        };
        if session_id.is_empty() || token.is_empty() || mobile.public_key.is_empty() {
            return false;
        }

        let wrapped = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            crypto::secret_key_from_hex(&config.private_key)
                .and_then(|secret| {
                    crypto::wrap_token_for_mobile(&token, &mobile.public_key, &secret)
                })
        };
        let wrapped = match wrapped {
            Ok(wrapped) => wrapped,
            Err(e) => {
                log::warn!("could not wrap token for {}: {e}", mobile.name);
                return false;
            }
        };

        match self
            .relay_client
            .add_session_token_for_mobile(&session_id, &mobile.id, &wrapped)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not attach session token: {e}");
                false
            }
        }
    }

    // ── Control dispatch ────────────────────────────────────────────────────

    async fn dispatch_control(self: &Arc<Self>, message: ControlMessage) {
        match message {
            ControlMessage::Resize { cols, rows } => {
                self.handle_resize_control(cols, rows).await;
            }
            ControlMessage::InfoRequest => self.send_cli_info().await,
            ControlMessage::MobileInfo { json } => {
                if let Some(required) = update::check_mobile_info(&json) {
                    let body = serde_json::to_string(&required).unwrap_or_default();
                    self.send_control(&format!("update-required:{body}")).await;
                }
            }
            ControlMessage::SshSetupKey {
                username,
                mobile_id,
                key_base64,
            } => {
                log::info!("installing SSH key for {username} (mobile {mobile_id})");
                let daemon = self.clone();
                tokio::spawn(async move {
                    let outcome = tokio::task::spawn_blocking(move || {
                        sshinfo::install_ssh_key(&mobile_id, &key_base64)
                    })
                    .await;
                    match outcome {
                        Ok(Ok(message)) => {
                            daemon
                                .send_control(&format!("ssh-setup-result:success:{message}"))
                                .await;
                            terminal::print_raw(&format!(
                                "\n{}[AIPilot] SSH key installed for mobile access{}\n",
                                style::GREEN,
                                style::RESET
                            ));
                        }
                        Ok(Err(e)) => {
                            daemon
                                .send_control(&format!("ssh-setup-result:error:{e}"))
                                .await;
                        }
                        Err(_) => {
                            daemon
                                .send_control("ssh-setup-result:error:Internal error")
                                .await;
                        }
                    }
                });
            }
            ControlMessage::FileUpload {
                file_name,
                data_base64,
            } => match BASE64.decode(&data_base64) {
                Ok(data) => self.finish_upload(&file_name, &data).await,
                Err(_) => {
                    self.send_control("file-upload-result:error:Invalid file encoding")
                        .await;
                }
            },
            ControlMessage::FileUploadInvalid => {
                self.send_control("file-upload-result:error:Invalid file upload format")
                    .await;
            }
            ControlMessage::FileUploadStart {
                upload_id,
                file_name,
                total_chunks,
                total_size,
            } => {
                self.ensure_upload_gc();
                self.uploads
                    .start(&upload_id, &file_name, total_chunks, total_size);
                self.send_control(&format!("file-upload-ack:{upload_id}:started"))
                    .await;
            }
            ControlMessage::FileUploadChunk {
                upload_id,
                index,
                data_base64,
            } => {
                let Ok(data) = BASE64.decode(&data_base64) else {
                    self.send_control(&format!(
                        "file-upload-result:error:Invalid chunk data for {upload_id}"
                    ))
                    .await;
                    return;
                };
                match self.uploads.add_chunk(&upload_id, index, data) {
                    ChunkOutcome::Ack { index } => {
                        self.send_control(&format!("file-upload-ack:{upload_id}:{index}"))
                            .await;
                    }
                    ChunkOutcome::Complete { file_name, data } => {
                        self.finish_upload(&file_name, &data).await;
                    }
                    ChunkOutcome::MissingChunk { index } => {
                        self.send_control(&format!(
                            "file-upload-result:error:Missing chunk {index} for {upload_id}"
                        ))
                        .await;
                    }
                    ChunkOutcome::UnknownUpload => {
                        self.send_control(&format!(
                            "file-upload-result:error:Unknown upload {upload_id}"
                        ))
                        .await;
                    }
                }
            }
            ControlMessage::FileUploadCancel { upload_id } => {
                if self.uploads.cancel(&upload_id) {
                    self.send_control(&format!("file-upload-ack:{upload_id}:cancelled"))
                        .await;
                }
            }
            ControlMessage::Unknown { verb } => {
                log::debug!("ignoring unknown control verb {verb}");
            }
        }
    }

    /// Sweep abandoned uploads once a minute. Started lazily on the first
    /// chunked upload.
    fn ensure_upload_gc(self: &Arc<Self>) {
        if self.upload_gc_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let daemon = self.clone();
        tokio::spawn(async move {
            let mut shutdown = daemon.subscribe_shutdown();
            loop {
                if sleep_or_shutdown(UPLOAD_CLEANUP_INTERVAL, &mut shutdown).await {
                    return;
                }
                let removed = daemon.uploads.remove_idle(UPLOAD_TIMEOUT);
                if removed > 0 {
                    log::info!("reclaimed {removed} abandoned upload(s)");
                }
            }
        });
    }

    async fn finish_upload(&self, file_name: &str, data: &[u8]) {
        match upload::save_uploaded_file(file_name, data) {
            Ok(path) => {
                self.send_control(&format!(
                    "file-upload-result:success:{}",
                    path.display()
                ))
                .await;
                let reference = file_reference_for(self.opts.agent_type, &path);
                self.send_to_pty(reference.as_bytes());
            }
            Err(e) => {
                self.send_control(&format!("file-upload-result:error:{e}"))
                    .await;
            }
        }
    }

    async fn send_cli_info(&self) {
        let command = self.opts.command.clone();
        let agent_type = self.opts.agent_type;
        let workdir = self.opts.workdir.clone();
        let gathered =
            tokio::task::spawn_blocking(move || info::gather(&command, agent_type, &workdir))
                .await;
        let Ok(cli_info) = gathered else { return };
        let Ok(body) = serde_json::to_string(&cli_info) else {
            return;
        };
        self.send_control(&format!("cli-info:{body}")).await;
    }

    // ── Local input ─────────────────────────────────────────────────────────

    /// Consume local stdin bytes: route to the pairing screen while it is
    /// up, otherwise through the line interceptor into the PTY.
    pub async fn run_local_input(self: Arc<Self>, mut stdin_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        let mut interceptor = LineInterceptor::new();
        let mut shutdown = self.subscribe_shutdown();

        loop {
            let chunk = tokio::select! {
                _ = shutdown.changed() => return,
                chunk = stdin_rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => return,
                },
            };

            let modal = {
                let router = self.qr_router.lock().unwrap_or_else(|e| e.into_inner());
                router.clone()
            };
            if let Some(tx) = modal {
                let _ = tx.send(chunk);
                continue;
            }

            for &byte in &chunk {
                match interceptor.push(byte) {
                    ByteOutcome::ForwardPrintable => {
                        self.send_to_pty(&[byte]);
                        self.schedule_pc_switch().await;
                    }
                    ByteOutcome::Forward => self.send_to_pty(&[byte]),
                    ByteOutcome::Intercept(command) => {
                        self.send_to_pty(&[CTRL_U]);
                        self.execute_meta_command(command).await;
                    }
                }
            }
        }
    }

    /// Forward PTY output chunks to the mobile. Local echo happens in the
    /// reader thread; this task only feeds the encrypted leg.
    pub async fn run_pty_forwarder(self: Arc<Self>, mut pty_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(chunk) = pty_rx.recv().await {
            self.send_to_mobile(&chunk).await;
        }
        self.state.write().await.running = false;
    }

    /// Track local terminal resizes (window-change signal).
    #[cfg(unix)]
    pub async fn run_winch_loop(self: Arc<Self>) {
        let Ok(mut winch) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
        else {
            return;
        };
        let mut shutdown = self.subscribe_shutdown();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                signal = winch.recv() => {
                    if signal.is_none() {
                        return;
                    }
                    if let Ok((cols, rows)) = terminal::terminal_size() {
                        self.handle_pc_winch(cols, rows).await;
                    }
                }
            }
        }
    }

    // ── Meta-commands ───────────────────────────────────────────────────────

    async fn execute_meta_command(self: &Arc<Self>, command: MetaCommand) {
        match command {
            MetaCommand::Status => {
                terminal::suspend_raw_mode();
                println!();
                self.print_status().await;
                terminal::resume_raw_mode();
            }
            MetaCommand::Disconnect => {
                self.disconnect_mobile().await;
            }
            MetaCommand::Purge => {
                terminal::suspend_raw_mode();
                println!();
                self.purge_sessions().await;
                terminal::resume_raw_mode();
            }
            MetaCommand::Quit => {
                terminal::print_raw(&format!(
                    "\n{}Shutting down AIPilot...{}\n",
                    style::YELLOW,
                    style::RESET
                ));
                self.request_shutdown();
            }
            MetaCommand::Qr => {
                let daemon = self.clone();
                tokio::spawn(async move { daemon.run_pairing_screen().await });
            }
        }
    }

    async fn print_status(&self) {
        let state = self.state.read().await;
        let session_short: String = state.session.chars().take(8).collect();

        println!("{}=== AIPilot Status ==={}", style::BOLD, style::RESET);
        println!("  Session:  {session_short}...");
        println!("  Command:  {}", self.opts.command);
        println!("  WorkDir:  {}", self.opts.workdir);
        println!(
            "  Platform: {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        if state.relay_connected {
            println!("  Relay:    {}✓ Connected{}", style::GREEN, style::RESET);
        } else {
            println!("  Relay:    {}✗ Disconnected{}", style::RED, style::RESET);
        }
        if state.mobile_connected {
            println!("  Mobile:   {}✓ Connected{}", style::GREEN, style::RESET);
        } else {
            println!("  Mobile:   {}⋯ Waiting{}", style::YELLOW, style::RESET);
        }
        if state.running {
            println!("  Agent:    {}✓ Running{}", style::GREEN, style::RESET);
        } else {
            println!("  Agent:    {}✗ Stopped{}", style::RED, style::RESET);
        }
        println!();
    }

    async fn disconnect_mobile(&self) {
        if !self.is_mobile_connected().await {
            terminal::print_raw(&format!(
                "\n{}Mobile not connected.{}\n",
                style::YELLOW,
                style::RESET
            ));
            return;
        }

        let _ = self.ws_send(&Envelope::of_kind("kick")).await;
        self.set_mobile_connected(false).await;
        terminal::print_raw(&format!(
            "\n{}Mobile disconnected.{}\n",
            style::GREEN,
            style::RESET
        ));
    }

    async fn purge_sessions(&self) {
        println!("{}Purging all sessions from relay...{}", style::DIM, style::RESET);
        match self.relay_client.purge_all_sessions().await {
            Ok(0) => println!("{}No sessions to purge.{}", style::YELLOW, style::RESET),
            Ok(count) => println!(
                "{}✓ Purged {count} session(s).{}",
                style::GREEN,
                style::RESET
            ),
            Err(e) => println!("{}Error: {e}{}", style::RED, style::RESET),
        }
    }

    // ── Pairing screen ──────────────────────────────────────────────────────

    /// Show the pairing QR in the alternate screen. Exits on ESC/Ctrl+C,
    /// pairing completion, or the pairing deadline.
    async fn run_pairing_screen(self: Arc<Self>) {
        let Some(mut keys) = self.qr_begin() else {
            return; // already showing
        };

        // Give the agent a clean screen to come back to.
        self.send_to_pty(&[CTRL_C]);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.send_to_pty(&[CTRL_L]);
        tokio::time::sleep(REDRAW_NUDGE_DELAY).await;

        terminal::enter_alt_screen();
        self.show_pairing_qr_and_poll(&mut keys).await;
        terminal::leave_alt_screen();

        self.qr_end();
    }

    async fn show_pairing_qr_and_poll(&self, keys: &mut mpsc::UnboundedReceiver<Vec<u8>>) {
        terminal::print_raw(&format!(
            "{}Creating pairing code...{}\n",
            style::DIM,
            style::RESET
        ));

        let (pc_name, public_key) = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            (config.pc_name.clone(), config.public_key.clone())
        };
        let pairing = match self.relay_client.init_pairing(&pc_name, &public_key).await {
            Ok(pairing) => pairing,
            Err(e) => {
                terminal::print_raw(&format!("{}Error: {e}{}\n", style::RED, style::RESET));
                wait_for_dismiss_key(keys).await;
                return;
            }
        };

        let qr_data = self.build_pairing_qr_data(&pairing.token).await;
        let Ok(qr_json) = serde_json::to_string(&qr_data) else {
            return;
        };

        let (max_cols, max_rows) = terminal::terminal_size().unwrap_or((80, 24));
        terminal::print_raw(&format!(
            "\n{}Scan to pair a new mobile device:{}\n\n",
            style::BOLD,
            style::RESET
        ));
        for line in qr::generate_qr_lines(&qr_json, max_cols, max_rows.saturating_sub(10)) {
            terminal::print_raw(&line);
            terminal::print_raw("\n");
        }
        terminal::print_raw(&format!("\n  PC: {pc_name}\n"));
        terminal::print_raw(&format!("  Expires: {}\n", pairing.expires_at));
        terminal::print_raw(&format!(
            "\n{}Press ESC or Ctrl+C to close{}\n",
            style::DIM,
            style::RESET
        ));

        // Poll pairing status until completion, expiry, deadline, or a
        // dismiss key.
        let deadline = tokio::time::Instant::now() + PAIRING_TIMEOUT;
        let mut poll = tokio::time::interval(PAIRING_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll.tick().await; // first tick is immediate; skip it

        loop {
            tokio::select! {
                chunk = keys.recv() => {
                    match chunk {
                        Some(chunk) if chunk.contains(&ESC) || chunk.contains(&CTRL_C) => return,
                        Some(_) => {}
                        None => return,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return,
                _ = poll.tick() => {
                    let status = match self.relay_client.check_pairing_status(&pairing.token).await {
                        Ok(status) => status,
                        Err(_) => continue,
                    };
                    match status.status.as_str() {
                        "completed" => {
                            self.finish_pairing(
                                status.mobile_id.unwrap_or_default(),
                                status.mobile_name.unwrap_or_default(),
                                status.public_key.unwrap_or_default(),
                            )
                            .await;
                            tokio::time::sleep(PAIRING_SUCCESS_PAUSE).await;
                            return;
                        }
                        "expired" => return,
                        _ => {}
                    }
                }
            }
        }
    }

    async fn build_pairing_qr_data(&self, pairing_token: &str) -> PairingQrData {
        let (pc_id, pc_name, public_key) = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            (
                config.pc_id.clone(),
                config.pc_name.clone(),
                config.public_key.clone(),
            )
        };
        let session_id = self.state.read().await.session.clone();

        let mut qr_data = PairingQrData {
            kind: "pairing".to_string(),
            relay: self.opts.relay_url.clone(),
            token: pairing_token.to_string(),
            pc_id,
            pc_name,
            public_key,
            session_id: None,
            working_dir: None,
            agent_type: None,
            ssh_available: None,
            ssh_port: None,
            hostname: None,
            username: None,
        };

        if !session_id.is_empty() {
            qr_data.session_id = Some(session_id);
            qr_data.working_dir = Some(self.opts.workdir.clone());
            qr_data.agent_type = Some(self.opts.agent_type.to_string());

            let ssh = tokio::task::spawn_blocking(sshinfo::detect_ssh_info)
                .await
                .ok();
            if let Some(ssh) = ssh {
                if ssh.available {
                    qr_data.ssh_available = Some(true);
                    qr_data.ssh_port = Some(ssh.port);
                    qr_data.hostname = Some(ssh.hostname);
                    qr_data.username = Some(ssh.username);
                }
            }
        }
        qr_data
    }

    /// Persist a completed pairing and share the live session with the new
    /// mobile (skipped when it re-paired with the same public key — its
    /// existing wrapped token still works).
    async fn finish_pairing(&self, mobile_id: String, mobile_name: String, public_key: String) {
        if mobile_id.is_empty() {
            return;
        }

        let same_public_key = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config
                .paired_mobile(&mobile_id)
                .is_some_and(|m| m.public_key == public_key)
        };

        let mobile = PairedMobile {
            id: mobile_id,
            name: mobile_name,
            public_key,
            paired_at: chrono::Utc::now().to_rfc3339(),
        };
        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.add_paired_mobile(mobile.clone());
            if let Err(e) = config.save() {
                log::warn!("could not save PC config: {e}");
            }
        }

        let has_session = !self.state.read().await.session.is_empty();
        let token_shared = if has_session && !same_public_key {
            self.add_token_for_mobile(&mobile).await
        } else {
            false
        };

        let note = if same_public_key {
            " (session unchanged)"
        } else if token_shared {
            " (session shared)"
        } else {
            ""
        };
        terminal::print_raw(&format!(
            "\n{}✓ Paired: {}{note}{}\n",
            style::GREEN,
            mobile.name,
            style::RESET
        ));
    }

    fn qr_begin(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut router = self.qr_router.lock().unwrap_or_else(|e| e.into_inner());
        if router.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *router = Some(tx);
        Some(rx)
    }

    fn qr_end(&self) {
        *self.qr_router.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    // ── Shutdown ────────────────────────────────────────────────────────────

    /// Delete the relay session and the local resume record. Runs on every
    /// process-terminating path.
    pub async fn cleanup(&self) {
        let session = self.state.read().await.session.clone();
        if !session.is_empty() {
            match self.relay_client.delete_session(&session).await {
                Ok(()) => println!("{}✓ Session cleaned up{}", style::DIM, style::RESET),
                Err(e) => println!(
                    "{}Warning: Could not delete session from relay: {e}{}",
                    style::YELLOW,
                    style::RESET
                ),
            }
        }
        session::remove(&self.opts.workdir);
        self.pty.kill();
    }

    /// Print the startup banner and session block.
    pub async fn print_banner(&self, resumed: bool, agent_version: &str) {
        let state = self.state.read().await;
        let session_short: String = state.session.chars().take(8).collect();

        println!();
        println!(
            "{}{}AIPilot CLI{} {}[{}]{}",
            style::BOLD,
            style::CYAN,
            style::RESET,
            style::DIM,
            VERSION,
            style::RESET
        );
        println!();
        print!("  Session:  {session_short}...");
        if resumed {
            print!(" {}(resumed){}", style::DIM, style::RESET);
        }
        println!();
        print!("  Command:  {}", self.opts.command);
        if !agent_version.is_empty() {
            print!(" {}({agent_version}){}", style::DIM, style::RESET);
        }
        println!();
        println!("  WorkDir:  {}", self.opts.workdir);
        println!(
            "  Platform: {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        println!();
        println!(
            "{}AIPilot: //qr //status //disconnect //purge //quit{}",
            style::DIM,
            style::RESET
        );
        println!();
    }
}

/// Wait for any key that dismisses a modal screen (ESC or Ctrl+C).
async fn wait_for_dismiss_key(keys: &mut mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = keys.recv().await {
        if chunk.contains(&ESC) || chunk.contains(&CTRL_C) {
            return;
        }
    }
}

/// Sleep, returning `true` early if shutdown was requested.
async fn sleep_or_shutdown(
    duration: std::time::Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

/// The short name a session is listed under: the workdir's basename.
#[must_use]
pub fn display_name_of(workdir: &str) -> String {
    Path::new(workdir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| workdir.to_string())
}

/// How an uploaded file is referenced at the agent's prompt.
#[must_use]
pub fn file_reference_for(agent_type: AgentType, path: &Path) -> String {
    match agent_type {
        AgentType::Gemini => format!("@{} ", path.display()),
        AgentType::Openai => format!("/mention {} ", path.display()),
        _ => format!("{} ", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_is_basename() {
        assert_eq!(display_name_of("/home/user/projects/api"), "api");
        assert_eq!(display_name_of("/"), "/");
    }

    #[test]
    fn test_file_reference_per_agent() {
        let path = Path::new("/tmp/aipilot_1_hi.txt");
        assert_eq!(
            file_reference_for(AgentType::Gemini, path),
            "@/tmp/aipilot_1_hi.txt "
        );
        assert_eq!(
            file_reference_for(AgentType::Openai, path),
            "/mention /tmp/aipilot_1_hi.txt "
        );
        assert_eq!(
            file_reference_for(AgentType::Claude, path),
            "/tmp/aipilot_1_hi.txt "
        );
        assert_eq!(
            file_reference_for(AgentType::Generic, path),
            "/tmp/aipilot_1_hi.txt "
        );
    }
}
