//! fail2ban metrics collector.
//!
//! Talks to the fail2ban server over its control socket and turns the answers
//! into Prometheus samples, with support for mocking the server in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MetricsCollector                       │
//! │  - up / jail_count / per-jail stats and config              │
//! │  - banned_ip (deduplicated, geo-enriched)                   │
//! │  - version / errors                                         │
//! │                            │                                │
//! │                     ┌──────▼────────┐                       │
//! │                     │ ControlClient │ (trait)               │
//! │                     └──────┬────────┘                       │
//! └────────────────────────────┼────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              │               │               │
//!     ┌────────▼───────┐ ┌─────▼──────┐ ┌──────▼──────┐
//!     │ Fail2BanSocket │ │ MockClient │ │  Scenarios  │
//!     │ (Unix socket)  │ │ (Testing)  │ │ (Fixtures)  │
//!     └────────────────┘ └────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ## Production
//!
//! ```ignore
//! use f2b_exporter_core::collector::{Fail2BanSocket, MetricsCollector};
//!
//! let client = Fail2BanSocket::new("/var/run/fail2ban/fail2ban.sock");
//! let collector = MetricsCollector::new(client, "0.3.0", false, None);
//! let mut samples = Vec::new();
//! collector.collect_into(&mut samples).unwrap();
//! ```
//!
//! ## Testing (with MockClient)
//!
//! ```
//! use f2b_exporter_core::collector::{MetricsCollector, MockClient};
//!
//! let collector = MetricsCollector::new(MockClient::typical(), "0.3.0", false, None);
//! let mut samples = Vec::new();
//! collector.collect_into(&mut samples).unwrap();
//! assert!(!samples.is_empty());
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod metrics;
pub mod mock;
pub mod socket;
pub mod traits;

pub use collector::{CollectError, ErrorCounters, ErrorKind, MetricsCollector};
pub use metrics::{FamilySink, MetricDef, Sample, SampleSink};
pub use mock::MockClient;
pub use socket::Fail2BanSocket;
pub use traits::{ClientError, ControlClient, ControlSession, JailStats};
