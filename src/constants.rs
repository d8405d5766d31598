//! Application-wide constants for the bridge.
//!
//! Centralizes timeouts, intervals, and filesystem modes so tuning happens
//! in one place. Grouped by domain.

use std::time::Duration;

// ============================================================================
// Identity
// ============================================================================

/// CLI version, baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default relay the bridge talks to when `--relay` is not given.
pub const DEFAULT_RELAY_URL: &str = "wss://aipilot-relay.softwarity.io";

// ============================================================================
// Timeouts & intervals
// ============================================================================

/// HTTP client request timeout for relay API calls.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between WebSocket reconnection attempts after a lost connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Delay between relay dial / session re-creation retries.
pub const RELAY_CONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval for WebSocket keepalive pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Interval for polling pairing status.
pub const PAIRING_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum time to wait for pairing completion.
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Maximum idle time before an in-flight chunked upload is reclaimed.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval for sweeping abandoned uploads.
pub const UPLOAD_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Quiet period of local typing before the PTY is resized back to PC
/// dimensions. Keeps the first keystroke after mobile activity from being
/// eaten by the resize.
pub const PC_SWITCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Delay before the Ctrl+L redraw nudge after switching the PTY to mobile
/// dimensions.
pub const REDRAW_NUDGE_DELAY: Duration = Duration::from_millis(50);

/// How long the pairing screen lingers after a successful pairing.
pub const PAIRING_SUCCESS_PAUSE: Duration = Duration::from_millis(500);

/// How long startup waits for an already-connected mobile before showing
/// the pairing hint.
pub const RESUME_PROBE_DELAY: Duration = Duration::from_millis(800);

// ============================================================================
// Buffers
// ============================================================================

/// Read buffer size for PTY output.
pub const PTY_BUFFER_SIZE: usize = 4096;

// ============================================================================
// Filesystem modes
// ============================================================================

/// Mode for config and session files (owner read/write only).
#[cfg(unix)]
pub const FILE_MODE: u32 = 0o600;

/// Mode for config directories (owner rwx only).
#[cfg(unix)]
pub const DIR_MODE: u32 = 0o700;

// ============================================================================
// SSH probing
// ============================================================================

/// Standard SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Common alternative SSH port.
pub const ALTERNATIVE_SSH_PORT: u16 = 2222;

/// Timeout for thorough SSH connection checks.
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for quick SSH availability probes.
pub const SSH_QUICK_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_shorter_than_upload_timeout() {
        assert!(PC_SWITCH_DEBOUNCE < Duration::from_secs(1));
        assert!(UPLOAD_CLEANUP_INTERVAL < UPLOAD_TIMEOUT);
    }

    #[test]
    fn test_reconnect_delays_are_reasonable() {
        assert!(RECONNECT_DELAY >= Duration::from_secs(1));
        assert!(RELAY_CONNECT_DELAY >= RECONNECT_DELAY);
    }
}
