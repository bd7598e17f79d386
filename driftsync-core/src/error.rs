//! Error classification for synced operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Why a single operation failed to sync.
///
/// Per-operation failures are data, recorded in the pass result and on the
/// queued entry; they never abort a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 4xx other than 401/403/409, or an operation the domain cannot map to a
    /// request. Surfaced for correction, never retried.
    Validation,
    /// 401. Needs re-authentication.
    Auth,
    /// 403. Needs re-authentication or different credentials.
    Permission,
    /// 409. Surfaced for resolution, never retried automatically.
    Conflict,
    /// 5xx.
    Server,
    /// Transport failure before a response arrived.
    Network,
    /// The per-request timeout elapsed.
    Timeout,
    /// Any other non-success status.
    Unknown,
}

impl ErrorKind {
    /// Classifies an HTTP status. Returns `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400 => Some(ErrorKind::Validation),
            401 => Some(ErrorKind::Auth),
            403 => Some(ErrorKind::Permission),
            409 => Some(ErrorKind::Conflict),
            500..=u16::MAX => Some(ErrorKind::Server),
            _ => Some(ErrorKind::Unknown),
        }
    }

    /// Failures worth retrying automatically on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Server | ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Unknown
        )
    }

    /// Failures that clear once the session is re-established.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, ErrorKind::Auth | ErrorKind::Permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Permission => "permission",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "auth" => Ok(ErrorKind::Auth),
            "permission" => Ok(ErrorKind::Permission),
            "conflict" => Ok(ErrorKind::Conflict),
            "server" => Ok(ErrorKind::Server),
            "network" => Ok(ErrorKind::Network),
            "timeout" => Ok(ErrorKind::Timeout),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(format!("Unknown error kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::from_status(200), None);
        assert_eq!(ErrorKind::from_status(204), None);
        assert_eq!(ErrorKind::from_status(400), Some(ErrorKind::Validation));
        assert_eq!(ErrorKind::from_status(401), Some(ErrorKind::Auth));
        assert_eq!(ErrorKind::from_status(403), Some(ErrorKind::Permission));
        assert_eq!(ErrorKind::from_status(409), Some(ErrorKind::Conflict));
        assert_eq!(ErrorKind::from_status(500), Some(ErrorKind::Server));
        assert_eq!(ErrorKind::from_status(503), Some(ErrorKind::Server));
        assert_eq!(ErrorKind::from_status(404), Some(ErrorKind::Unknown));
        assert_eq!(ErrorKind::from_status(422), Some(ErrorKind::Unknown));
        assert_eq!(ErrorKind::from_status(302), Some(ErrorKind::Unknown));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Server.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Network.is_transient());
        assert!(!ErrorKind::Conflict.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
        assert!(!ErrorKind::Auth.is_transient());
        assert!(ErrorKind::Auth.needs_reauth());
        assert!(ErrorKind::Permission.needs_reauth());
    }

    #[test]
    fn test_string_roundtrip() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Auth,
            ErrorKind::Permission,
            ErrorKind::Conflict,
            ErrorKind::Server,
            ErrorKind::Network,
            ErrorKind::Timeout,
            ErrorKind::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("nope".parse::<ErrorKind>().is_err());
    }
}
