//! Operator screens and the transitions between them.

use std::fmt;

use tracing::debug;
use vigil_common::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Screen {
    /// Live list of broadcasting devices. Always the root.
    #[default]
    Directory,
    Viewer {
        channel_id: String,
    },
    Incidents,
    PermissionAudit,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Screen::Directory => write!(f, "directory"),
            Screen::Viewer { channel_id } => write!(f, "viewer({channel_id})"),
            Screen::Incidents => write!(f, "incidents"),
            Screen::PermissionAudit => write!(f, "permission audit"),
        }
    }
}

/// Back stack of screens rooted at [`Screen::Directory`].
///
/// Every screen other than the directory is opened from the directory, so
/// the stack is never deeper than two.
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    stack: Vec<Screen>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Screen {
        self.stack.last().unwrap_or(&Screen::Directory)
    }

    pub fn select_device(&mut self, channel_id: &str) -> Result<&Screen> {
        if channel_id.trim().is_empty() {
            return Err(Error::invalid_input("selected channel is empty"));
        }
        self.open(Screen::Viewer {
            channel_id: channel_id.to_string(),
        })
    }

    pub fn open_incidents(&mut self) -> Result<&Screen> {
        self.open(Screen::Incidents)
    }

    pub fn open_permission_audit(&mut self) -> Result<&Screen> {
        self.open(Screen::PermissionAudit)
    }

    /// Leave the current screen. Returns the screen that was closed, or
    /// `None` when already at the directory.
    pub fn back(&mut self) -> Option<Screen> {
        let closed = self.stack.pop()?;
        debug!(from = %closed, to = %self.current(), "navigated back");
        Some(closed)
    }

    fn open(&mut self, next: Screen) -> Result<&Screen> {
        if *self.current() != Screen::Directory {
            return Err(Error::invalid_state("open screen", self.current()));
        }
        debug!(to = %next, "navigated");
        self.stack.push(next);
        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_opens_from_directory_and_returns() {
        let mut nav = Navigator::new();
        assert_eq!(nav.current(), &Screen::Directory);

        nav.select_device("ch1").unwrap();
        assert_eq!(
            nav.current(),
            &Screen::Viewer {
                channel_id: "ch1".into()
            }
        );

        let closed = nav.back().unwrap();
        assert_eq!(closed.to_string(), "viewer(ch1)");
        assert_eq!(nav.current(), &Screen::Directory);
        assert!(nav.back().is_none());
    }

    #[test]
    fn test_screens_only_open_from_directory() {
        let mut nav = Navigator::new();
        nav.open_incidents().unwrap();

        let err = nav.select_device("ch1").unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(nav.open_permission_audit().is_err());
        assert_eq!(nav.current(), &Screen::Incidents);

        nav.back();
        assert_eq!(nav.open_permission_audit().unwrap(), &Screen::PermissionAudit);
    }

    #[test]
    fn test_empty_selection_rejected() {
        let mut nav = Navigator::new();
        assert!(matches!(nav.select_device(" "), Err(Error::InvalidInput(_))));
        assert_eq!(nav.current(), &Screen::Directory);
    }
}
