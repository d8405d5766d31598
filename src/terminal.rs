//! Local terminal mode management.
//!
//! The bridge keeps the operator's terminal in raw mode so every keystroke
//! reaches the PTY unmodified. Meta-command output needs cooked mode again,
//! and every exit path must leave the terminal the way we found it — the
//! guard handles both.

use anyhow::{Context, Result};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use std::io::Write;

/// ANSI styling shorthands for user-facing output.
pub mod style {
    pub const DIM: &str = "\x1b[2m";
    pub const RESET: &str = "\x1b[0m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
    pub const BOLD: &str = "\x1b[1m";
}

/// Whether stdin is a terminal.
#[must_use]
pub fn stdin_is_tty() -> bool {
    use crossterm::tty::IsTty;
    std::io::stdin().is_tty()
}

/// Current terminal size as `(cols, rows)`.
///
/// # Errors
///
/// Returns an error when the size cannot be queried (not a terminal).
pub fn terminal_size() -> Result<(u16, u16)> {
    crossterm::terminal::size().context("cannot query terminal size")
}

/// Raw-mode guard. Enters raw mode on construction, restores cooked mode on
/// drop and on demand around command output.
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Enter raw mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal refuses raw mode.
    pub fn enter() -> Result<Self> {
        enable_raw_mode().context("could not enter raw mode")?;
        Ok(Self { active: true })
    }

    /// Temporarily restore cooked mode (for printing a status block or
    /// running the pairing screen).
    pub fn suspend(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
            self.active = false;
        }
    }

    /// Re-enter raw mode after [`Self::suspend`].
    pub fn resume(&mut self) {
        if !self.active && enable_raw_mode().is_ok() {
            self.active = true;
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
        }
    }
}

/// Drop to cooked mode for command output. Pair with
/// [`resume_raw_mode`]; the owning [`RawModeGuard`] still restores on exit.
pub fn suspend_raw_mode() {
    let _ = disable_raw_mode();
}

/// Re-enter raw mode after [`suspend_raw_mode`].
pub fn resume_raw_mode() {
    let _ = enable_raw_mode();
}

/// Switch to the alternate screen, cleared, cursor hidden.
pub fn enter_alt_screen() {
    let mut stdout = std::io::stdout();
    let _ = execute!(
        stdout,
        EnterAlternateScreen,
        crossterm::terminal::Clear(crossterm::terminal::ClearType::All),
        crossterm::cursor::MoveTo(0, 0),
        crossterm::cursor::Hide
    );
}

/// Restore the main screen and the cursor.
pub fn leave_alt_screen() {
    let mut stdout = std::io::stdout();
    let _ = execute!(stdout, crossterm::cursor::Show, LeaveAlternateScreen);
}

/// Print to stdout with `\n` expanded to `\r\n`, as raw mode requires.
pub fn print_raw(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.replace('\n', "\r\n").as_bytes());
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_codes_are_ansi() {
        assert!(style::DIM.starts_with('\x1b'));
        assert!(style::RESET.ends_with('m'));
    }
}
