//! f2b-exporter-core: fail2ban metrics collection library.
//!
//! Provides:
//! - `collector`: control socket abstraction, per-scrape orchestration,
//!   metric definitions and the Prometheus collector adapter
//! - `geo`: optional geolocation enrichment of banned addresses
//! - `textfile`: pass-through of `*.prom` files written by other tools
//! - `util`: host name resolution

pub mod collector;
pub mod geo;
pub mod textfile;
pub mod util;

/// Exporter version reported in the `f2b_version` metric.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
