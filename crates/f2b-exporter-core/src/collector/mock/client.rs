//! In-memory mock of the fail2ban control channel.
//!
//! Lets collector tests script jails, inject failures per query and check
//! that every opened session is closed again.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::collector::traits::{ClientError, ControlClient, ControlSession, JailStats};

/// Queries that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockQuery {
    Ping,
    Jails,
    Stats,
    BannedAddresses,
    BanTime,
    FindTime,
    MaxRetries,
    Version,
}

/// A scripted jail.
#[derive(Debug, Clone, Default)]
pub struct MockJail {
    pub name: String,
    pub stats: JailStats,
    pub banned: Vec<String>,
    pub ban_time: u64,
    pub find_time: u64,
    pub max_retries: u64,
}

impl MockJail {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ban_time: 600,
            find_time: 600,
            max_retries: 5,
            ..Default::default()
        }
    }

    pub fn with_stats(mut self, stats: JailStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_banned(mut self, addresses: &[&str]) -> Self {
        self.banned = addresses.iter().map(|a| a.to_string()).collect();
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    jails: Vec<MockJail>,
    alive: bool,
    version: String,
    /// Remaining connection attempts that fail; `usize::MAX` fails forever.
    failing_connects: usize,
    /// Failures applying to every jail.
    failing: HashSet<MockQuery>,
    /// Failures applying to one jail.
    failing_for_jail: HashSet<(String, MockQuery)>,
}

/// Mock `ControlClient`. Clones share state and counters.
#[derive(Debug, Clone)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// A reachable daemon with no jails.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                alive: true,
                version: "1.0.2".to_string(),
                ..Default::default()
            })),
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    pub fn with_jail(self, jail: MockJail) -> Self {
        self.with_state(|s| s.jails.push(jail))
    }

    pub fn with_version(self, version: &str) -> Self {
        self.with_state(|s| s.version = version.to_string())
    }

    /// Ping answers `false` instead of failing.
    pub fn not_alive(self) -> Self {
        self.with_state(|s| s.alive = false)
    }

    /// Every connection attempt fails.
    pub fn unreachable(self) -> Self {
        self.with_state(|s| s.failing_connects = usize::MAX)
    }

    /// The next `n` connection attempts fail, later ones succeed.
    pub fn failing_connects(self, n: usize) -> Self {
        self.with_state(|s| s.failing_connects = n)
    }

    pub fn failing(self, query: MockQuery) -> Self {
        self.with_state(|s| {
            s.failing.insert(query);
        })
    }

    pub fn failing_for(self, jail: &str, query: MockQuery) -> Self {
        self.with_state(|s| {
            s.failing_for_jail.insert((jail.to_string(), query));
        })
    }

    /// Number of successful `connect` calls.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of sessions closed (each session counts once).
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ControlClient for MockClient {
    type Session = MockSession;

    fn connect(&self) -> Result<MockSession, ClientError> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| ClientError::Protocol("mock state poisoned".to_string()))?;
            if state.failing_connects > 0 {
                if state.failing_connects != usize::MAX {
                    state.failing_connects -= 1;
                }
                return Err(ClientError::Connect(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "mock socket unreachable",
                )));
            }
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            state: Arc::clone(&self.state),
            closes: Arc::clone(&self.closes),
            open: true,
        })
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}

/// Session handed out by `MockClient`.
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    closes: Arc<AtomicUsize>,
    open: bool,
}

impl MockSession {
    fn query<T>(
        &self,
        jail: Option<&str>,
        query: MockQuery,
        f: impl FnOnce(&MockState) -> Option<T>,
    ) -> Result<T, ClientError> {
        if !self.open {
            return Err(ClientError::Closed);
        }
        let state = self
            .state
            .lock()
            .map_err(|_| ClientError::Protocol("mock state poisoned".to_string()))?;
        let injected = state.failing.contains(&query)
            || jail.is_some_and(|j| state.failing_for_jail.contains(&(j.to_string(), query)));
        if injected {
            return Err(ClientError::Server(format!("injected {:?} failure", query)));
        }
        f(&*state).ok_or_else(|| ClientError::Server(format!("unknown jail {:?}", jail)))
    }

    fn jail_field<T>(
        &self,
        jail: &str,
        query: MockQuery,
        f: impl FnOnce(&MockJail) -> T,
    ) -> Result<T, ClientError> {
        self.query(Some(jail), query, |s| {
            s.jails.iter().find(|j| j.name == jail).map(f)
        })
    }
}

impl ControlSession for MockSession {
    fn ping(&mut self) -> Result<bool, ClientError> {
        self.query(None, MockQuery::Ping, |s| Some(s.alive))
    }

    fn jails(&mut self) -> Result<Vec<String>, ClientError> {
        self.query(None, MockQuery::Jails, |s| {
            Some(s.jails.iter().map(|j| j.name.clone()).collect())
        })
    }

    fn jail_stats(&mut self, jail: &str) -> Result<JailStats, ClientError> {
        self.jail_field(jail, MockQuery::Stats, |j| j.stats)
    }

    fn banned_addresses(&mut self, jail: &str) -> Result<Vec<String>, ClientError> {
        self.jail_field(jail, MockQuery::BannedAddresses, |j| j.banned.clone())
    }

    fn ban_time(&mut self, jail: &str) -> Result<u64, ClientError> {
        self.jail_field(jail, MockQuery::BanTime, |j| j.ban_time)
    }

    fn find_time(&mut self, jail: &str) -> Result<u64, ClientError> {
        self.jail_field(jail, MockQuery::FindTime, |j| j.find_time)
    }

    fn max_retries(&mut self, jail: &str) -> Result<u64, ClientError> {
        self.jail_field(jail, MockQuery::MaxRetries, |j| j.max_retries)
    }

    fn server_version(&mut self) -> Result<String, ClientError> {
        self.query(None, MockQuery::Version, |s| Some(s.version.clone()))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.close();
    }
}
