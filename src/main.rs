//! AIPilot CLI — bridge an AI terminal agent to a paired mobile device.
//!
//! This is the binary entry point: flag parsing, one-shot maintenance
//! modes, agent selection, session bootstrap, and the task wiring around
//! [`aipilot::Daemon`].

use aipilot::agents::{self, AgentType};
use aipilot::config::{self, PcConfig};
use aipilot::constants::{DEFAULT_RELAY_URL, PTY_BUFFER_SIZE, RESUME_PROBE_DELAY, VERSION};
use aipilot::daemon::{display_name_of, Daemon, DaemonOptions};
use aipilot::pty::PtyManager;
use aipilot::relay::RelayClient;
use aipilot::session::{self, SessionData};
use aipilot::terminal::{self, style};
use aipilot::{crypto, sshinfo};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::io::{Read, Write};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "aipilot-cli",
    version = VERSION,
    about = "Bridge an AI terminal agent to your phone through an encrypted relay"
)]
struct Cli {
    /// Agent executable to spawn; pass `?` to force re-selection
    #[arg(long)]
    agent: Option<String>,

    /// Working directory for the agent (defaults to the current directory)
    #[arg(long)]
    workdir: Option<String>,

    /// List detected AI agents and exit
    #[arg(long)]
    agents: bool,

    /// List this PC's relay sessions and exit
    #[arg(long)]
    sessions: bool,

    /// Unpair a mobile device by id (8-char prefix accepted)
    #[arg(long, value_name = "MOBILE_ID")]
    unpair: Option<String>,

    /// Print PC identity and paired mobiles, then exit
    #[arg(long)]
    status: bool,

    /// Force a new session instead of resuming the saved one
    #[arg(long)]
    new: bool,

    /// WebSocket relay base URL
    #[arg(long, default_value = DEFAULT_RELAY_URL)]
    relay: String,

    /// Accept unencrypted frames from legacy mobile builds (receive only)
    #[arg(long)]
    legacy_plaintext: bool,
}

fn init_logging() {
    let log_path = std::env::var("AIPILOT_LOG_FILE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("aipilot.log"));

    match std::fs::File::create(&log_path) {
        Ok(log_file) => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            )
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .format_timestamp_secs()
            .init();
        }
        Err(_) => {
            // No log file — stay quiet rather than corrupt the raw terminal.
            env_logger::Builder::new()
                .filter_level(log::LevelFilter::Off)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    // Restore the terminal before any panic output.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {panic_info:?}");
        terminal::suspend_raw_mode();
        terminal::leave_alt_screen();
        default_hook(panic_info);
    }));

    let mut pc_config = PcConfig::load_or_create()?;

    if cli.status {
        show_pc_status(&pc_config);
        return Ok(());
    }
    if cli.agents {
        return list_agents();
    }
    if let Some(mobile_id) = &cli.unpair {
        return handle_unpair(&mut pc_config, &cli.relay, mobile_id).await;
    }
    if cli.sessions {
        return list_sessions(&pc_config, &cli.relay).await;
    }

    run_bridge(cli, pc_config).await
}

/// The main bridge mode: spawn the agent, connect the relay, multiplex.
async fn run_bridge(cli: Cli, pc_config: PcConfig) -> Result<()> {
    let workdir = resolve_workdir(cli.workdir.as_deref())?;

    // Resume the saved session for this directory unless told otherwise.
    let mut resumed_session: Option<SessionData> = None;
    if !cli.new {
        if let Ok(saved) = session::load(&workdir) {
            if saved.relay == cli.relay {
                println!(
                    "{}Session found for this directory, using saved session...{}",
                    style::DIM,
                    style::RESET
                );
                resumed_session = Some(saved);
            } else {
                println!(
                    "{}Session found but relay mismatch (saved: {}, current: {}){}",
                    style::DIM,
                    saved.relay,
                    cli.relay,
                    style::RESET
                );
            }
        }
    }

    let command = select_command(&cli, resumed_session.as_ref(), &workdir)?;
    let agent_type = agents::detect_agent_type(&command);
    let agent_version = agents::agent_version(&command);

    let relay_client = RelayClient::new(&cli.relay, &pc_config.pc_id)?;

    let (session_id, token, resumed) = match resumed_session {
        Some(saved) => (saved.session, saved.token, true),
        None => {
            let (session_id, token) =
                create_session(&relay_client, &pc_config, agent_type, &workdir).await;
            session::save(
                &workdir,
                &SessionData {
                    session: session_id.clone(),
                    token: token.clone(),
                    relay: cli.relay.clone(),
                    command: command.clone(),
                    workdir: workdir.clone(),
                    created_at: chrono::Utc::now().to_rfc3339(),
                },
            )
            .unwrap_or_else(|e| log::warn!("could not save session file: {e}"));
            (session_id, token, false)
        }
    };

    // Spawn the agent under its PTY at the local terminal's size.
    let is_tty = terminal::stdin_is_tty();
    let (pc_cols, pc_rows) = if is_tty {
        terminal::terminal_size().unwrap_or((80, 24))
    } else {
        (80, 24)
    };

    println!("Starting {command}...");
    let (pty, pty_reader, mut child_exit) =
        PtyManager::spawn(&command, &workdir, pc_cols, pc_rows)
            .with_context(|| format!("failed to start {command}"))?;

    let daemon = Daemon::new(
        DaemonOptions {
            relay_url: cli.relay.clone(),
            command: command.clone(),
            workdir: workdir.clone(),
            agent_type,
            legacy_plaintext: cli.legacy_plaintext,
        },
        pc_config,
        relay_client,
        session_id,
        token,
        pty,
    );
    if is_tty {
        daemon.seed_pc_viewport(pc_cols, pc_rows).await;
    }

    // Connect early so a still-attached mobile is visible before the hint.
    tokio::spawn(daemon.clone().run_relay_loop());

    if resumed {
        println!(
            "{}Checking if mobile is already connected...{}",
            style::DIM,
            style::RESET
        );
        tokio::time::sleep(RESUME_PROBE_DELAY).await;
    }
    if daemon.is_mobile_connected().await {
        println!("{}✓ Mobile already connected!{}", style::GREEN, style::RESET);
    } else {
        println!(
            "{}Type //qr at the prompt to pair or reconnect a mobile device.{}",
            style::DIM,
            style::RESET
        );
    }
    daemon.print_banner(resumed, &agent_version).await;

    // Raw mode for byte-accurate passthrough; the guard restores on drop.
    let raw_guard = if is_tty {
        Some(terminal::RawModeGuard::enter()?)
    } else {
        None
    };

    // stdin → interceptor → PTY
    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
            }
        }
    });
    tokio::spawn(daemon.clone().run_local_input(stdin_rx));

    // PTY → stdout (in-thread) and → mobile (via the forwarder task)
    let (pty_tx, pty_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut reader = pty_reader;
        let mut buf = [0u8; PTY_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(&buf[..n]);
                    let _ = stdout.flush();
                    if pty_tx.send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
            }
        }
    });
    tokio::spawn(daemon.clone().run_pty_forwarder(pty_rx));

    #[cfg(unix)]
    tokio::spawn(daemon.clone().run_winch_loop());

    // Wait for a termination cause.
    let exit_message = wait_for_termination(&daemon, &mut child_exit).await?;

    daemon.request_shutdown();

    // Restore the terminal before printing anything.
    drop(raw_guard);
    println!("\n\n{exit_message}");

    daemon.cleanup().await;
    Ok(())
}

/// Block until a signal, a `//quit`, or the agent's exit.
#[cfg(unix)]
async fn wait_for_termination(
    daemon: &Daemon,
    child_exit: &mut tokio::sync::oneshot::Receiver<portable_pty::ExitStatus>,
) -> Result<String> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut shutdown = daemon.subscribe_shutdown();
    let mut sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("cannot install SIGHUP handler")?;

    let message = tokio::select! {
        _ = tokio::signal::ctrl_c() => "Shutting down AIPilot...".to_string(),
        _ = sigterm.recv() => "Shutting down AIPilot...".to_string(),
        _ = sighup.recv() => "Shutting down AIPilot...".to_string(),
        _ = shutdown.changed() => "Shutting down AIPilot...".to_string(),
        status = child_exit => exit_message_for(status.ok()),
    };
    Ok(message)
}

#[cfg(not(unix))]
async fn wait_for_termination(
    daemon: &Daemon,
    child_exit: &mut tokio::sync::oneshot::Receiver<portable_pty::ExitStatus>,
) -> Result<String> {
    let mut shutdown = daemon.subscribe_shutdown();
    let message = tokio::select! {
        _ = tokio::signal::ctrl_c() => "Shutting down AIPilot...".to_string(),
        _ = shutdown.changed() => "Shutting down AIPilot...".to_string(),
        status = child_exit => exit_message_for(status.ok()),
    };
    Ok(message)
}

fn exit_message_for(status: Option<portable_pty::ExitStatus>) -> String {
    match status {
        Some(status) if status.success() => "Process exited.".to_string(),
        Some(status) => format!("Process exited with error: exit code {}", status.exit_code()),
        None => "Process exited.".to_string(),
    }
}

/// Resolve and validate the working directory.
fn resolve_workdir(flag: Option<&str>) -> Result<String> {
    let dir = match flag {
        Some(dir) => std::path::PathBuf::from(dir),
        None => std::env::current_dir().context("failed to get working directory")?,
    };
    let dir = dir
        .canonicalize()
        .with_context(|| format!("working directory not found: {}", dir.display()))?;
    Ok(dir.to_string_lossy().into_owned())
}

/// Pick the agent command: resumed session first, then the flag, then the
/// per-directory preference, then interactive detection.
fn select_command(cli: &Cli, resumed: Option<&SessionData>, workdir: &str) -> Result<String> {
    let force_selection = cli.agent.as_deref() == Some("?");

    if !force_selection {
        if let Some(agent) = cli.agent.as_deref() {
            agents::check_command(agent).map(|_| ())?;
            let _ = config::set_directory_agent(workdir, agent);
            return Ok(agent.to_string());
        }
        if let Some(saved) = resumed {
            if !saved.command.is_empty() {
                return Ok(saved.command.clone());
            }
        }
        if let Some(preferred) = config::directory_agent(workdir) {
            if agents::check_command(&preferred).is_ok() {
                let _ = config::set_directory_agent(workdir, &preferred);
                return Ok(preferred);
            }
        }
    }

    let available = agents::detect_available_agents();
    let Some(command) = agents::select_agent(&available) else {
        println!("{}No AI agents found in PATH.{}", style::RED, style::RESET);
        println!("Supported agents: claude, aider, gemini");
        println!("Install one of these agents or specify one with --agent.");
        std::process::exit(1);
    };
    let _ = config::set_directory_agent(workdir, &command);
    Ok(command)
}

/// Register the session on the relay, wrapping the token for every paired
/// mobile. Falls back to a purely local session when the relay is down —
/// the reconnect loop re-registers later.
async fn create_session(
    relay_client: &RelayClient,
    pc_config: &PcConfig,
    agent_type: AgentType,
    workdir: &str,
) -> (String, String) {
    let token = session::generate_token();

    let mut encrypted_tokens = HashMap::new();
    if let Ok(secret) = crypto::secret_key_from_hex(&pc_config.private_key) {
        for mobile in &pc_config.paired_mobiles {
            if mobile.public_key.is_empty() {
                continue;
            }
            match crypto::wrap_token_for_mobile(&token, &mobile.public_key, &secret) {
                Ok(wrapped) => {
                    encrypted_tokens.insert(mobile.id.clone(), wrapped);
                }
                Err(e) => println!(
                    "{}Warning: Could not encrypt token for {}: {e}{}",
                    style::YELLOW,
                    mobile.name,
                    style::RESET
                ),
            }
        }
    }

    let ssh = sshinfo::detect_ssh_info();
    match relay_client
        .create_session(
            &agent_type.to_string(),
            workdir,
            &display_name_of(workdir),
            Some(&ssh),
            &encrypted_tokens,
            &token,
        )
        .await
    {
        Ok(created) => (created.session_id, created.token),
        Err(e) => {
            println!(
                "{}Relay unavailable, hosting a local session: {e}{}",
                style::YELLOW,
                style::RESET
            );
            (uuid::Uuid::new_v4().to_string(), token)
        }
    }
}

/// `--status`: print the PC identity and paired mobiles.
fn show_pc_status(config: &PcConfig) {
    let pc_short: String = config.pc_id.chars().take(8).collect();
    println!();
    println!(
        "{}{}=== AIPilot PC Status ==={}",
        style::BOLD,
        style::CYAN,
        style::RESET
    );
    println!();
    println!("  PC ID:      {pc_short}...");
    println!("  PC Name:    {}", config.pc_name);
    println!("  Created:    {}", config.created_at);
    println!();

    if config.paired_mobiles.is_empty() {
        println!("  {}No paired mobile devices{}", style::DIM, style::RESET);
        println!(
            "\n  Type {}//qr{} inside a session to pair a mobile device.",
            style::CYAN,
            style::RESET
        );
    } else {
        println!("{}  Paired Mobiles:{}", style::BOLD, style::RESET);
        for mobile in &config.paired_mobiles {
            let id_short: String = mobile.id.chars().take(8).collect();
            println!("    {}✓{} {}", style::GREEN, style::RESET, mobile.name);
            println!("      ID: {id_short}...");
            println!("      Paired: {}", mobile.paired_at);
        }
    }
    println!();
}

/// `--agents`: list installed agents.
fn list_agents() -> Result<()> {
    let available = agents::detect_available_agents();
    if available.is_empty() {
        println!("No AI agents found in PATH.");
        println!("Supported agents: claude, aider, gemini");
        std::process::exit(1);
    }
    println!("\n{}=== Available AI Agents ==={}", style::BOLD, style::RESET);
    for agent in &available {
        if agent.version.is_empty() {
            println!("  {}✓{} {}", style::GREEN, style::RESET, agent.command);
        } else {
            println!(
                "  {}✓{} {} ({})",
                style::GREEN,
                style::RESET,
                agent.command,
                agent.version
            );
        }
    }
    println!();
    Ok(())
}

/// `--unpair <id>`: remove a paired mobile locally and on the relay.
async fn handle_unpair(config: &mut PcConfig, relay_url: &str, mobile_id: &str) -> Result<()> {
    let found = config
        .paired_mobiles
        .iter()
        .find(|m| m.id == mobile_id || m.id.starts_with(mobile_id))
        .cloned();

    let Some(mobile) = found else {
        println!(
            "{}Mobile device not found: {mobile_id}{}",
            style::RED,
            style::RESET
        );
        if !config.paired_mobiles.is_empty() {
            println!("\nPaired devices:");
            for m in &config.paired_mobiles {
                let id_short: String = m.id.chars().take(8).collect();
                println!("  - {} (ID: {id_short})", m.name);
            }
        }
        std::process::exit(1);
    };

    let id_short: String = mobile.id.chars().take(8).collect();
    println!("Unpairing {} ({id_short})...", mobile.name);

    let relay_client = RelayClient::new(relay_url, &config.pc_id)?;
    if let Err(e) = relay_client.unpair_mobile(&mobile.id).await {
        println!(
            "{}Warning: Could not notify relay: {e}{}",
            style::YELLOW,
            style::RESET
        );
    }

    config.remove_paired_mobile(&mobile.id);
    config.save()?;
    println!(
        "{}✓ Successfully unpaired {}{}",
        style::GREEN,
        mobile.name,
        style::RESET
    );
    Ok(())
}

/// `--sessions`: list this PC's sessions on the relay.
async fn list_sessions(config: &PcConfig, relay_url: &str) -> Result<()> {
    let relay_client = RelayClient::new(relay_url, &config.pc_id)?;
    let sessions = relay_client
        .list_all_sessions()
        .await
        .context("could not list sessions from relay")?;

    if sessions.is_empty() {
        println!("No sessions on the relay.");
        return Ok(());
    }

    println!("\n{}=== Relay Sessions ==={}", style::BOLD, style::RESET);
    for session in &sessions {
        let id_short: String = session.id.chars().take(8).collect();
        let name = session
            .display_name
            .clone()
            .unwrap_or_else(|| session.working_dir.clone());
        println!(
            "  {id_short}...  {:8}  {}",
            session.agent_type, name
        );
    }
    println!();
    Ok(())
}
