//! PTY lifecycle for the agent child process.
//!
//! Spawns the configured agent under a pseudo-terminal and exposes
//! thread-safe write / resize / size-query. Writes, resizes, and size
//! queries share one mutex so the child observes ioctl and write in a total
//! order. Reads are deliberately NOT behind that mutex — the single reader
//! thread owns them, and a blocking read holding a lock would deadlock
//! every writer.

use anyhow::{Context, Result};
use portable_pty::{
    native_pty_system, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use std::io::{Read, Write};
use std::sync::Mutex;
use tokio::sync::oneshot;

struct PtyIo {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
}

/// Handle to the agent's PTY.
pub struct PtyManager {
    io: Mutex<PtyIo>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl std::fmt::Debug for PtyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyManager").finish_non_exhaustive()
    }
}

impl PtyManager {
    /// Spawn `command` under a fresh PTY in `workdir`.
    ///
    /// The child inherits the environment with `TERM` forced to
    /// `xterm-256color`. Returns the manager, the raw output reader (hand
    /// it to exactly one reader thread), and a receiver that fires when the
    /// child exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the PTY cannot be opened or the spawn fails.
    pub fn spawn(
        command: &str,
        workdir: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(Self, Box<dyn Read + Send>, oneshot::Receiver<ExitStatus>)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open PTY")?;

        let mut cmd = CommandBuilder::new(command);
        cmd.cwd(workdir);
        cmd.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("failed to start {command}"))?;
        // The master keeps the PTY open; the slave belongs to the child now.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .context("failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("failed to take PTY writer")?;
        let killer = child.clone_killer();

        let (exit_tx, exit_rx) = oneshot::channel();
        std::thread::spawn(move || {
            let status = child
                .wait()
                .unwrap_or_else(|_| ExitStatus::with_exit_code(1));
            let _ = exit_tx.send(status);
        });

        Ok((
            Self {
                io: Mutex::new(PtyIo {
                    master: pair.master,
                    writer,
                }),
                killer: Mutex::new(killer),
            },
            reader,
            exit_rx,
        ))
    }

    /// Write bytes to the child's input.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        io.writer.write_all(data).context("PTY write failed")?;
        io.writer.flush().context("PTY flush failed")
    }

    /// Resize the PTY.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize ioctl fails.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        io.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow::anyhow!("PTY resize failed: {e}"))
    }

    /// Current PTY winsize as `(cols, rows)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the size query fails.
    pub fn size(&self) -> Result<(u16, u16)> {
        let io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let size = io
            .master
            .get_size()
            .map_err(|e| anyhow::anyhow!("PTY size query failed: {e}"))?;
        Ok((size.cols, size.rows))
    }

    /// Kill the child process if it is still running.
    pub fn kill(&self) {
        let mut killer = self.killer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = killer.kill() {
            log::debug!("PTY child kill: {e}");
        }
    }
}

impl Drop for PtyManager {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_resize_and_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pty, _reader, exit_rx) =
            PtyManager::spawn("sh", dir.path().to_str().unwrap(), 80, 24).unwrap();

        assert_eq!(pty.size().unwrap(), (80, 24));
        pty.resize(100, 30).unwrap();
        assert_eq!(pty.size().unwrap(), (100, 30));

        pty.write(b"exit\n").unwrap();
        let status = tokio::time::timeout(Duration::from_secs(10), exit_rx)
            .await
            .expect("child exits")
            .expect("exit status delivered");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_output_reaches_reader() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pty, mut reader, _exit_rx) =
            PtyManager::spawn("sh", dir.path().to_str().unwrap(), 80, 24).unwrap();

        pty.write(b"echo br_$((100+23))\n").unwrap();

        let collected = tokio::task::spawn_blocking(move || {
            let mut collected = Vec::new();
            let mut buf = [0u8; 4096];
            for _ in 0..50 {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        collected.extend_from_slice(&buf[..n]);
                        if collected.windows(6).any(|w| w == b"br_123") {
                            break;
                        }
                    }
                }
            }
            collected
        })
        .await
        .unwrap();

        assert!(
            collected.windows(6).any(|w| w == b"br_123"),
            "expected echoed output, got {:?}",
            String::from_utf8_lossy(&collected)
        );
        pty.kill();
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = PtyManager::spawn(
            "definitely-not-a-real-agent-binary",
            dir.path().to_str().unwrap(),
            80,
            24,
        );
        // Spawn either fails outright or the child exits immediately;
        // portable-pty reports the failure on spawn for missing binaries.
        if let Ok((pty, _r, _e)) = result {
            pty.kill();
        }
    }
}
