//! Two-client viewport state.
//!
//! The PTY has exactly one winsize, but two clients with independent screen
//! sizes type into it. The winsize tracks whichever side most recently
//! produced input; this module holds the pure state machine, the daemon
//! applies the resulting resizes and notifications.

/// Which client the PTY winsize currently tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveClient {
    Pc,
    Mobile,
}

impl std::fmt::Display for ActiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pc => f.write_str("pc"),
            Self::Mobile => f.write_str("mobile"),
        }
    }
}

/// A viewport size in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Winsize {
    pub cols: u16,
    pub rows: u16,
}

/// Both clients' sizes plus the active marker.
///
/// Sizes start unknown; `current` starts unset until the first switch (the
/// startup path seeds PC dims from the controlling TTY and activates PC).
#[derive(Debug, Default)]
pub struct Viewport {
    pc: Option<Winsize>,
    mobile: Option<Winsize>,
    current: Option<ActiveClient>,
}

impl Viewport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the PC terminal size.
    pub fn set_pc(&mut self, cols: u16, rows: u16) {
        self.pc = Some(Winsize { cols, rows });
    }

    /// Record the mobile viewport size.
    pub fn set_mobile(&mut self, cols: u16, rows: u16) {
        self.mobile = Some(Winsize { cols, rows });
    }

    /// Mark a client active without deciding a resize (startup seeding).
    pub fn force_active(&mut self, client: ActiveClient) {
        self.current = Some(client);
    }

    #[must_use]
    pub fn current(&self) -> Option<ActiveClient> {
        self.current
    }

    #[must_use]
    pub fn size_of(&self, client: ActiveClient) -> Option<Winsize> {
        match client {
            ActiveClient::Pc => self.pc,
            ActiveClient::Mobile => self.mobile,
        }
    }

    /// Decide a switch to `target`.
    ///
    /// No-op when the target is already active or its dimensions are
    /// unknown. On success the marker is updated and the size the PTY must
    /// adopt is returned — callers apply it after releasing their lock.
    pub fn plan_switch(&mut self, target: ActiveClient) -> Option<Winsize> {
        if self.current == Some(target) {
            return None;
        }
        let size = self.size_of(target)?;
        self.current = Some(target);
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_requires_known_dimensions() {
        let mut vp = Viewport::new();
        assert_eq!(vp.plan_switch(ActiveClient::Mobile), None);
        assert_eq!(vp.current(), None);

        vp.set_mobile(90, 40);
        assert_eq!(
            vp.plan_switch(ActiveClient::Mobile),
            Some(Winsize { cols: 90, rows: 40 })
        );
        assert_eq!(vp.current(), Some(ActiveClient::Mobile));
    }

    #[test]
    fn test_switch_to_current_is_noop() {
        let mut vp = Viewport::new();
        vp.set_pc(120, 50);
        assert!(vp.plan_switch(ActiveClient::Pc).is_some());
        assert_eq!(vp.plan_switch(ActiveClient::Pc), None);
    }

    #[test]
    fn test_alternating_switches_track_each_side() {
        let mut vp = Viewport::new();
        vp.set_pc(120, 50);
        vp.set_mobile(60, 30);
        vp.force_active(ActiveClient::Pc);

        assert_eq!(
            vp.plan_switch(ActiveClient::Mobile),
            Some(Winsize { cols: 60, rows: 30 })
        );
        assert_eq!(
            vp.plan_switch(ActiveClient::Pc),
            Some(Winsize { cols: 120, rows: 50 })
        );
    }

    #[test]
    fn test_size_update_while_active_does_not_flip_marker() {
        let mut vp = Viewport::new();
        vp.set_mobile(60, 30);
        vp.plan_switch(ActiveClient::Mobile);

        vp.set_mobile(62, 31);
        assert_eq!(vp.current(), Some(ActiveClient::Mobile));
        assert_eq!(vp.plan_switch(ActiveClient::Mobile), None);
        assert_eq!(
            vp.size_of(ActiveClient::Mobile),
            Some(Winsize { cols: 62, rows: 31 })
        );
    }

    #[test]
    fn test_display_names_match_wire_protocol() {
        assert_eq!(ActiveClient::Pc.to_string(), "pc");
        assert_eq!(ActiveClient::Mobile.to_string(), "mobile");
    }
}
