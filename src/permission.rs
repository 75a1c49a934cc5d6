//! Speech recognition authorization
//!
//! The authorization flag is tracked outside the conversation; every entry
//! point that begins listening checks it first.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Authorization status for speech recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Authorization {
    Authorized,
    Denied,
    Restricted,
    #[default]
    NotDetermined,
}

impl Authorization {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::NotDetermined => "notDetermined",
        }
    }

    /// Parse from a config or environment value, case-insensitive
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['_', '-'], "").as_str() {
            "authorized" => Some(Self::Authorized),
            "denied" => Some(Self::Denied),
            "restricted" => Some(Self::Restricted),
            "notdetermined" => Some(Self::NotDetermined),
            _ => None,
        }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable authorization flag
#[derive(Clone)]
pub struct PermissionGate {
    tx: Arc<watch::Sender<Authorization>>,
}

impl PermissionGate {
    #[must_use]
    pub fn new(initial: Authorization) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve the initial status by probing for an input device
    ///
    /// An explicit override wins. Without one, a present microphone counts as
    /// authorized and a missing one as restricted.
    #[must_use]
    pub fn probe(override_status: Option<Authorization>) -> Self {
        let status = override_status.unwrap_or_else(|| {
            if crate::voice::input_available() {
                Authorization::Authorized
            } else {
                Authorization::Restricted
            }
        });
        tracing::info!(%status, "speech recognition authorization");
        Self::new(status)
    }

    #[must_use]
    pub fn current(&self) -> Authorization {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.current() == Authorization::Authorized
    }

    /// Update the status; subscribers are notified only on change
    pub fn set(&self, status: Authorization) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Authorization> {
        self.tx.subscribe()
    }
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("status", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_value() {
        assert_eq!(
            Authorization::from_str_value("Authorized"),
            Some(Authorization::Authorized)
        );
        assert_eq!(
            Authorization::from_str_value("not_determined"),
            Some(Authorization::NotDetermined)
        );
        assert_eq!(
            Authorization::from_str_value("notDetermined"),
            Some(Authorization::NotDetermined)
        );
        assert_eq!(Authorization::from_str_value("maybe"), None);
    }

    #[test]
    fn test_gate_set_and_observe() {
        let gate = PermissionGate::new(Authorization::Denied);
        let mut rx = gate.subscribe();
        assert!(!gate.is_authorized());

        gate.set(Authorization::Authorized);
        assert!(gate.is_authorized());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Authorization::Authorized);

        gate.set(Authorization::Authorized);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_serde_camel_case() {
        let json = serde_json::to_string(&Authorization::NotDetermined).unwrap();
        assert_eq!(json, "\"notDetermined\"");
    }
}
