//! Unix socket client for the fail2ban server.
//!
//! Every `connect` opens a new stream; sessions are closed explicitly or on
//! drop and are never reused across scrapes.

mod protocol;

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde_pickle::Value;
use tracing::{debug, trace};

use super::traits::{ClientError, ControlClient, ControlSession, JailStats};
use protocol::{CLOSE_COMMAND, END_COMMAND};

/// Default per-request read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

/// Largest reply accepted from the server, end marker included.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Client for the fail2ban control socket.
#[derive(Debug, Clone)]
pub struct Fail2BanSocket {
    path: PathBuf,
    timeout: Duration,
}

impl Fail2BanSocket {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the read/write timeout applied to every request.
    ///
    /// `Duration::ZERO` is ignored; the std socket API rejects it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }
}

impl ControlClient for Fail2BanSocket {
    type Session = Fail2BanSession;

    fn connect(&self) -> Result<Fail2BanSession, ClientError> {
        let stream = UnixStream::connect(&self.path).map_err(ClientError::Connect)?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(ClientError::Connect)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(ClientError::Connect)?;
        debug!(path = %self.path.display(), "fail2ban socket opened");
        Ok(Fail2BanSession {
            stream: Some(stream),
        })
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// One open connection to the fail2ban server.
pub struct Fail2BanSession {
    stream: Option<UnixStream>,
}

impl Fail2BanSession {
    fn send(&mut self, command: &[&str]) -> Result<Value, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::Closed)?;
        trace!(command = ?command, "sending fail2ban command");
        stream.write_all(&protocol::encode_request(command)?)?;
        let frame = read_frame(stream, MAX_FRAME_SIZE)?;
        protocol::decode_reply(&frame)
    }

    fn get_u64(&mut self, jail: &str, key: &str) -> Result<u64, ClientError> {
        let value = self.send(&["get", jail, key])?;
        protocol::as_u64(&value)
            .ok_or_else(|| ClientError::Protocol(format!("'{}' of jail {} is not a number", key, jail)))
    }
}

/// Reads one reply up to the end marker and returns it without the marker.
///
/// Fails once more than `limit` bytes arrived without a marker.
fn read_frame(stream: &mut impl Read, limit: usize) -> Result<Vec<u8>, ClientError> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(ClientError::Protocol(
                "connection closed before end of reply".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.ends_with(END_COMMAND) {
            buf.truncate(buf.len() - END_COMMAND.len());
            return Ok(buf);
        }
        if buf.len() > limit {
            return Err(ClientError::Protocol(format!(
                "reply exceeds {} bytes without end marker",
                limit
            )));
        }
    }
}

impl ControlSession for Fail2BanSession {
    fn ping(&mut self) -> Result<bool, ClientError> {
        let reply = self.send(&["ping"])?;
        Ok(protocol::as_string(&reply).as_deref() == Some("pong"))
    }

    fn jails(&mut self) -> Result<Vec<String>, ClientError> {
        let reply = self.send(&["status"])?;
        protocol::parse_jail_list(&reply)
    }

    fn jail_stats(&mut self, jail: &str) -> Result<JailStats, ClientError> {
        let reply = self.send(&["status", jail])?;
        protocol::parse_jail_stats(&reply)
    }

    fn banned_addresses(&mut self, jail: &str) -> Result<Vec<String>, ClientError> {
        let reply = self.send(&["status", jail])?;
        protocol::parse_banned_addresses(&reply)
    }

    fn ban_time(&mut self, jail: &str) -> Result<u64, ClientError> {
        self.get_u64(jail, "bantime")
    }

    fn find_time(&mut self, jail: &str) -> Result<u64, ClientError> {
        self.get_u64(jail, "findtime")
    }

    fn max_retries(&mut self, jail: &str) -> Result<u64, ClientError> {
        self.get_u64(jail, "maxretry")
    }

    fn server_version(&mut self) -> Result<String, ClientError> {
        let reply = self.send(&["version"])?;
        protocol::as_string(&reply)
            .ok_or_else(|| ClientError::Protocol("version is not a string".to_string()))
    }

    fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let mut message = CLOSE_COMMAND.to_vec();
        message.extend_from_slice(END_COMMAND);
        // The stream may already be broken after a failed request.
        if let Err(e) = stream.write_all(&message) {
            debug!(error = %e, "failed to send close command");
        }
        let _ = stream.shutdown(std::net::Shutdown::Both);
        trace!("fail2ban socket closed");
    }
}

impl Drop for Fail2BanSession {
    fn drop(&mut self) {
        self.close();
    }
}
