//! Abstractions for the fail2ban control channel.
//!
//! The `ControlClient` trait lets the collector talk to the real daemon over
//! its Unix socket or to an in-memory mock in tests.

use std::fmt;
use std::io;

/// Error returned by control channel operations.
#[derive(Debug)]
pub enum ClientError {
    /// The socket could not be opened.
    Connect(io::Error),
    /// Read or write on an open session failed.
    Io(io::Error),
    /// The daemon did not answer within the configured timeout.
    Timeout,
    /// The reply could not be decoded or had an unexpected shape.
    Protocol(String),
    /// The daemon answered with a non-zero status.
    Server(String),
    /// The session was already closed.
    Closed,
}

impl ClientError {
    /// Returns true for failures to reach the daemon at all.
    ///
    /// Everything else is a failure of a single request on a reachable daemon.
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connect(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Connect(e) => write!(f, "failed to connect to fail2ban socket: {}", e),
            ClientError::Io(e) => write!(f, "fail2ban socket I/O error: {}", e),
            ClientError::Timeout => write!(f, "fail2ban socket request timed out"),
            ClientError::Protocol(msg) => write!(f, "unexpected fail2ban reply: {}", msg),
            ClientError::Server(msg) => write!(f, "fail2ban server error: {}", msg),
            ClientError::Closed => write!(f, "fail2ban session already closed"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Connect(e) | ClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
            _ => ClientError::Io(e),
        }
    }
}

/// Failure and ban counters of a single jail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JailStats {
    pub failed_current: u64,
    pub failed_total: u64,
    pub banned_current: u64,
    pub banned_total: u64,
}

/// One open session against the daemon.
///
/// Sessions are never shared between scrapes. `close` must be idempotent and
/// safe to call after a failed request; implementations also close on drop.
pub trait ControlSession: Send {
    /// Liveness check.
    fn ping(&mut self) -> Result<bool, ClientError>;

    /// Names of all configured jails, in daemon order.
    fn jails(&mut self) -> Result<Vec<String>, ClientError>;

    fn jail_stats(&mut self, jail: &str) -> Result<JailStats, ClientError>;

    /// Currently banned addresses of a jail. May contain duplicates.
    fn banned_addresses(&mut self, jail: &str) -> Result<Vec<String>, ClientError>;

    /// Ban duration in seconds.
    fn ban_time(&mut self, jail: &str) -> Result<u64, ClientError>;

    /// Failure lookback window in seconds.
    fn find_time(&mut self, jail: &str) -> Result<u64, ClientError>;

    fn max_retries(&mut self, jail: &str) -> Result<u64, ClientError>;

    fn server_version(&mut self) -> Result<String, ClientError>;

    fn close(&mut self);
}

/// Factory for control sessions.
pub trait ControlClient: Send + Sync {
    type Session: ControlSession;

    /// Opens a fresh session.
    fn connect(&self) -> Result<Self::Session, ClientError>;

    /// Human readable target, used in log lines.
    fn target(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_are_connection_class() {
        let e = ClientError::Connect(io::Error::from(io::ErrorKind::NotFound));
        assert!(e.is_connection());
        assert!(!ClientError::Timeout.is_connection());
        assert!(!ClientError::Server("boom".into()).is_connection());
    }

    #[test]
    fn timeouts_map_to_timeout_variant() {
        let e: ClientError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(e, ClientError::Timeout));
        let e: ClientError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(e, ClientError::Io(_)));
    }
}
