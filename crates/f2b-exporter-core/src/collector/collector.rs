//! Per-scrape orchestration.
//!
//! `MetricsCollector` drives the control client through one scrape cycle,
//! isolates failures per query, deduplicates banned addresses, enriches them
//! with geo labels and owns the cumulative error counters.

use std::collections::HashSet;
use std::fmt;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use tracing::{debug, error, info, warn};

use super::metrics::{
    BANNED_IP, DESCRIBED, ERRORS, FamilySink, JAIL_BAN_TIME, JAIL_BANNED_CURRENT,
    JAIL_BANNED_TOTAL, JAIL_COUNT, JAIL_FAILED_CURRENT, JAIL_FAILED_TOTAL, JAIL_FIND_TIME,
    JAIL_MAX_RETRIES, MetricDef, SERVER_UP, Sample, SampleSink, VERSION_INFO,
};
use super::traits::{ClientError, ControlClient, ControlSession};
use crate::geo::{self, GeoEnricher, NoGeo};
use crate::util;

/// Kind of counted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The control socket could not be opened.
    Connection,
    /// A single query on an open session failed.
    Request,
}

impl ErrorKind {
    /// Value of the `type` label.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Connection => "socket_conn",
            ErrorKind::Request => "socket_req",
        }
    }
}

/// Process-lifetime error counters. Never reset.
#[derive(Debug, Default)]
pub struct ErrorCounters {
    connection: AtomicU64,
    request: AtomicU64,
}

impl ErrorCounters {
    pub fn record(&self, kind: ErrorKind) {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, kind: ErrorKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    fn counter(&self, kind: ErrorKind) -> &AtomicU64 {
        match kind {
            ErrorKind::Connection => &self.connection,
            ErrorKind::Request => &self.request,
        }
    }
}

/// Error that aborts a scrape.
#[derive(Debug)]
pub enum CollectError {
    /// Connection failed while the exit-on-connection-error policy is set.
    FatalConnection(ClientError),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::FatalConnection(e) => write!(f, "fatal socket connection error: {}", e),
        }
    }
}

impl std::error::Error for CollectError {}

type ConfigQuery<S> = fn(&mut S, &str) -> Result<u64, ClientError>;

/// Collector of fail2ban metrics.
pub struct MetricsCollector<C: ControlClient> {
    client: C,
    exporter_version: String,
    hostname: String,
    exit_on_connection_error: bool,
    geo: Box<dyn GeoEnricher>,
    errors: ErrorCounters,
    descs: Vec<Desc>,
}

impl<C: ControlClient> MetricsCollector<C> {
    /// Creates a new collector.
    ///
    /// # Arguments
    /// * `client` - Control channel to the fail2ban server
    /// * `exporter_version` - Reported in the version metric
    /// * `exit_on_connection_error` - Terminate the process when a scrape cannot connect
    /// * `geo` - Optional enricher; `None` disables geo-tagging
    pub fn new(
        client: C,
        exporter_version: impl Into<String>,
        exit_on_connection_error: bool,
        geo: Option<Box<dyn GeoEnricher>>,
    ) -> Self {
        let descs = DESCRIBED
            .iter()
            .filter_map(|metric| match metric.desc() {
                Ok(desc) => Some(desc),
                Err(e) => {
                    error!(metric = %metric.fq_name(), error = %e, "invalid metric descriptor");
                    None
                }
            })
            .collect();

        Self {
            client,
            exporter_version: exporter_version.into(),
            hostname: util::hostname(),
            exit_on_connection_error,
            geo: geo.unwrap_or_else(|| Box::new(NoGeo)),
            errors: ErrorCounters::default(),
            descs,
        }
    }

    /// Overrides the resolved host name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn errors(&self) -> &ErrorCounters {
        &self.errors
    }

    /// Static descriptors announced before any scrape.
    pub fn describe(&self) -> &[Desc] {
        &self.descs
    }

    /// Logs the fail2ban server version once. Touches no counters.
    pub fn log_server_version(&self) {
        match self.client.connect().and_then(|mut s| s.server_version()) {
            Ok(version) => info!(
                socket = %self.client.target(),
                version = %version,
                "connected to fail2ban server"
            ),
            Err(e) => warn!(socket = %self.client.target(), error = %e, "fail2ban server not reachable"),
        }
    }

    /// Opens a dedicated session and pings the server.
    ///
    /// Failures are counted like in a scrape and reported as `false`.
    pub fn health_check(&self) -> bool {
        let mut session = match self.connect() {
            Ok(session) => session,
            Err(_) => return false,
        };
        match session.ping() {
            Ok(alive) => alive,
            Err(e) => {
                self.request_failed("ping", None, &e);
                false
            }
        }
    }

    /// Runs one scrape cycle, pushing samples into `sink`.
    ///
    /// Returns an error only when the initial connection fails under the
    /// exit-on-connection-error policy; in that case nothing was emitted.
    pub fn collect_into(&self, sink: &mut impl SampleSink) -> Result<(), CollectError> {
        let mut session = match self.connect() {
            Ok(session) => Some(session),
            Err(e) if self.exit_on_connection_error => {
                return Err(CollectError::FatalConnection(e));
            }
            Err(_) => None,
        };

        self.collect_server_up(sink, session.as_mut());

        let server_version = session.as_mut().map(|session| {
            self.collect_jail_metrics(sink, session);
            match session.server_version() {
                Ok(version) => version,
                Err(e) => {
                    self.request_failed("server version", None, &e);
                    String::new()
                }
            }
        });
        if let Some(mut session) = session {
            session.close();
        }

        self.collect_banned_addresses(sink);

        // Only reported when the server was reachable.
        if let Some(server_version) = server_version {
            self.emit(
                sink,
                &VERSION_INFO,
                vec![
                    self.exporter_version.clone(),
                    server_version,
                    self.hostname.clone(),
                ],
                1.0,
            );
        }

        self.collect_error_counts(sink);
        Ok(())
    }

    fn connect(&self) -> Result<C::Session, ClientError> {
        self.client.connect().map_err(|e| {
            self.errors.record(ErrorKind::Connection);
            warn!(socket = %self.client.target(), error = %e, "error opening socket");
            e
        })
    }

    fn request_failed(&self, what: &str, jail: Option<&str>, e: &ClientError) {
        self.errors.record(ErrorKind::Request);
        match jail {
            Some(jail) => warn!(jail, error = %e, "failed to get {}", what),
            None => warn!(error = %e, "failed to get {}", what),
        }
    }

    fn emit(&self, sink: &mut impl SampleSink, metric: &'static MetricDef, labels: Vec<String>, value: f64) {
        sink.emit(Sample {
            metric,
            labels,
            value,
        });
    }

    fn emit_jail(&self, sink: &mut impl SampleSink, metric: &'static MetricDef, jail: &str, value: u64) {
        self.emit(
            sink,
            metric,
            vec![jail.to_string(), self.hostname.clone()],
            value as f64,
        );
    }

    fn collect_server_up(&self, sink: &mut impl SampleSink, session: Option<&mut C::Session>) {
        let up = match session.map(|s| s.ping()) {
            Some(Ok(true)) => 1.0,
            Some(Ok(false)) | None => 0.0,
            Some(Err(e)) => {
                self.request_failed("ping", None, &e);
                0.0
            }
        };
        self.emit(sink, &SERVER_UP, vec![self.hostname.clone()], up);
    }

    fn collect_jail_metrics(&self, sink: &mut impl SampleSink, session: &mut C::Session) {
        let jails = match session.jails() {
            Ok(jails) => jails,
            Err(e) => {
                self.request_failed("jail list", None, &e);
                Vec::new()
            }
        };
        self.emit(sink, &JAIL_COUNT, vec![self.hostname.clone()], jails.len() as f64);

        for jail in &jails {
            self.collect_jail_stats(sink, session, jail);
            self.collect_jail_config(sink, session, jail);
        }
    }

    fn collect_jail_stats(&self, sink: &mut impl SampleSink, session: &mut C::Session, jail: &str) {
        let stats = match session.jail_stats(jail) {
            Ok(stats) => stats,
            Err(e) => {
                self.request_failed("stats", Some(jail), &e);
                return;
            }
        };
        self.emit_jail(sink, &JAIL_FAILED_CURRENT, jail, stats.failed_current);
        self.emit_jail(sink, &JAIL_FAILED_TOTAL, jail, stats.failed_total);
        self.emit_jail(sink, &JAIL_BANNED_CURRENT, jail, stats.banned_current);
        self.emit_jail(sink, &JAIL_BANNED_TOTAL, jail, stats.banned_total);
    }

    fn collect_jail_config(&self, sink: &mut impl SampleSink, session: &mut C::Session, jail: &str) {
        let queries: [(&'static MetricDef, &str, ConfigQuery<C::Session>); 3] = [
            (&JAIL_BAN_TIME, "ban time", <C::Session as ControlSession>::ban_time),
            (&JAIL_FIND_TIME, "find time", <C::Session as ControlSession>::find_time),
            (&JAIL_MAX_RETRIES, "max retries", <C::Session as ControlSession>::max_retries),
        ];
        for (metric, what, query) in queries {
            match query(session, jail) {
                Ok(value) => self.emit_jail(sink, metric, jail, value),
                Err(e) => self.request_failed(what, Some(jail), &e),
            }
        }
    }

    /// Emits one sample per unique (jail, address) pair, using its own session.
    fn collect_banned_addresses(&self, sink: &mut impl SampleSink) {
        let Ok(mut session) = self.connect() else {
            return;
        };

        let jails = match session.jails() {
            Ok(jails) => jails,
            Err(e) => {
                self.request_failed("jail list for banned addresses", None, &e);
                return;
            }
        };

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for jail in &jails {
            let addresses = match session.banned_addresses(jail) {
                Ok(addresses) => addresses,
                Err(e) => {
                    self.request_failed("banned addresses", Some(jail), &e);
                    continue;
                }
            };
            for address in addresses {
                if !seen.insert((jail.clone(), address.clone())) {
                    continue;
                }
                self.emit_banned_address(sink, jail, &address);
            }
        }
        session.close();
        debug!(count = seen.len(), "banned addresses collected");
    }

    fn emit_banned_address(&self, sink: &mut impl SampleSink, jail: &str, address: &str) {
        let declared = self.geo.labels();
        let annotation = self.geo.annotate(address).map(|mut labels| {
            labels.retain(|name, _| declared.contains(name));
            labels
        });
        let mut labels = vec![jail.to_string(), address.to_string(), self.hostname.clone()];
        labels.extend(geo::flatten(annotation.as_ref()));
        self.emit(sink, &BANNED_IP, labels, 1.0);
    }

    fn collect_error_counts(&self, sink: &mut impl SampleSink) {
        for kind in [ErrorKind::Connection, ErrorKind::Request] {
            self.emit(
                sink,
                &ERRORS,
                vec![kind.label().to_string(), self.hostname.clone()],
                self.errors.get(kind) as f64,
            );
        }
    }
}

impl<C: ControlClient> Collector for MetricsCollector<C> {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut sink = FamilySink::new();
        if let Err(e) = self.collect_into(&mut sink) {
            error!(error = %e, "exiting");
            process::exit(1);
        }
        sink.finish()
    }
}
