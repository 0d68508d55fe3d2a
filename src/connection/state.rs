//! Connection lifecycle state and quit signals.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of a managed connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket being opened.
    Connecting = 0,
    /// Magic sent, waiting for the IDENTIFY exchange and upgrades.
    Handshaking = 1,
    /// Both loops running.
    Steady = 2,
    /// Quit observed or fatal error; no new sends accepted.
    Draining = 3,
    /// Both loops have exited.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Steady,
            3 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Handshaking => "HANDSHAKING",
            ConnectionState::Steady => "STEADY",
            ConnectionState::Draining => "DRAINING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Shared, monotonic state cell.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Connecting as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` unless already there or further along.
    ///
    /// Returns true if the state changed.
    pub(crate) fn advance(&self, to: ConnectionState) -> bool {
        let previous = self.0.fetch_max(to as u8, Ordering::AcqRel);
        if previous < to as u8 {
            tracing::debug!(
                "Connection state {} -> {}",
                ConnectionState::from_u8(previous),
                to
            );
            true
        } else {
            false
        }
    }
}

/// One-way flag shared between tasks.
///
/// Checked at loop boundaries; raising it never interrupts an in-flight
/// socket call.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal(Arc<AtomicBool>);

impl QuitSignal {
    /// A lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. It stays raised.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether [`raise`](Self::raise) has been called on any clone.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Quit signals of one connection.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    /// Cooperative quit.
    pub(crate) quit: QuitSignal,
    /// Forced quit; wins over `ignore_quit`.
    pub(crate) force: QuitSignal,
    ignore_quit: AtomicBool,
}

impl Signals {
    pub(crate) fn new(ignore_quit: bool) -> Self {
        Self {
            quit: QuitSignal::new(),
            force: QuitSignal::new(),
            ignore_quit: AtomicBool::new(ignore_quit),
        }
    }

    pub(crate) fn set_ignore_quit(&self, ignore: bool) {
        self.ignore_quit.store(ignore, Ordering::Release);
    }

    pub(crate) fn ignores_quit(&self) -> bool {
        self.ignore_quit.load(Ordering::Acquire)
    }

    /// Whether the loops should exit at their next boundary.
    pub(crate) fn should_stop(&self) -> bool {
        self.force.is_raised() || (self.quit.is_raised() && !self.ignores_quit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let state = AtomicState::new();
        assert_eq!(state.load(), ConnectionState::Connecting);

        assert!(state.advance(ConnectionState::Steady));
        assert!(!state.advance(ConnectionState::Handshaking));
        assert_eq!(state.load(), ConnectionState::Steady);

        assert!(state.advance(ConnectionState::Closed));
        assert!(!state.advance(ConnectionState::Draining));
        assert_eq!(state.load(), ConnectionState::Closed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Steady.to_string(), "STEADY");
        assert_eq!(ConnectionState::Closed.to_string(), "CLOSED");
    }

    #[test]
    fn test_quit_signal_shared_between_clones() {
        let signal = QuitSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_raised());

        signal.raise();
        assert!(clone.is_raised());
    }

    #[test]
    fn test_cooperative_quit() {
        let signals = Signals::new(false);
        assert!(!signals.should_stop());

        signals.quit.raise();
        assert!(signals.should_stop());
    }

    #[test]
    fn test_ignored_quit_still_honours_force() {
        let signals = Signals::new(true);
        signals.quit.raise();
        assert!(!signals.should_stop());

        signals.force.raise();
        assert!(signals.should_stop());
    }

    #[test]
    fn test_ignore_quit_toggle() {
        let signals = Signals::new(true);
        signals.quit.raise();
        assert!(!signals.should_stop());

        signals.set_ignore_quit(false);
        assert!(signals.should_stop());
    }
}
