//! Per-side line buffering and meta-command detection.
//!
//! Both input paths — local stdin and decrypted mobile bytes — run through
//! one of these. Printable characters accumulate into a shadow of the line
//! the agent is seeing; at end-of-line the shadow is checked against the
//! meta-command table. A hit means the agent's input line is killed with a
//! synthesized Ctrl+U and the Enter never reaches the PTY.
//!
//! Escape sequences (cursor keys, terminal responses) pass through without
//! touching the buffer — they are not typing.

use crate::commands::MetaCommand;

const ESC: u8 = 0x1b;
const CTRL_C: u8 = 0x03;
const CTRL_U: u8 = 0x15;

/// What to do with one input byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOutcome {
    /// Forward the byte to the PTY unchanged.
    Forward,
    /// Forward the byte; it was printable typing (arms the PC-switch
    /// debounce on the local side).
    ForwardPrintable,
    /// The accumulated line is a bridge command: kill the agent's input
    /// line (Ctrl+U) instead of forwarding this Enter, then run it.
    Intercept(MetaCommand),
}

/// Line accumulator for one input side.
#[derive(Debug, Default)]
pub struct LineInterceptor {
    buffer: String,
    in_escape: bool,
}

impl LineInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte and decide its fate.
    pub fn push(&mut self, byte: u8) -> ByteOutcome {
        if self.in_escape {
            // Sequences end at a terminator letter or '~' (simplified CSI
            // handling, same coverage the agents rely on).
            if byte.is_ascii_alphabetic() || byte == b'~' {
                self.in_escape = false;
            }
            return ByteOutcome::Forward;
        }

        match byte {
            ESC => {
                self.in_escape = true;
                ByteOutcome::Forward
            }
            b'\r' | b'\n' => {
                let line = self.buffer.trim().to_ascii_lowercase();
                self.buffer.clear();
                match MetaCommand::parse(&line) {
                    Some(cmd) => ByteOutcome::Intercept(cmd),
                    None => ByteOutcome::Forward,
                }
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                ByteOutcome::Forward
            }
            CTRL_C | CTRL_U => {
                self.buffer.clear();
                ByteOutcome::Forward
            }
            0x20..=0x7e => {
                self.buffer.push(byte as char);
                ByteOutcome::ForwardPrintable
            }
            _ => ByteOutcome::Forward,
        }
    }

    /// Current shadow of the pending line (for tests and diagnostics).
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
