//! Metric definitions and sample sinks.
//!
//! A scrape pushes `Sample`s into a `SampleSink`. `FamilySink` turns them into
//! Prometheus metric families; tests collect them into a `Vec<Sample>`.

use std::collections::HashMap;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, Opts};
use tracing::warn;

/// Prefix of every metric name.
pub const NAMESPACE: &str = "f2b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Static definition of one metric.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDef {
    pub subsystem: &'static str,
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
    pub kind: MetricKind,
}

impl MetricDef {
    /// Full metric name, e.g. `f2b_config_jail_ban_time`.
    pub fn fq_name(&self) -> String {
        if self.subsystem.is_empty() {
            format!("{}_{}", NAMESPACE, self.name)
        } else {
            format!("{}_{}_{}", NAMESPACE, self.subsystem, self.name)
        }
    }

    pub fn opts(&self) -> Opts {
        Opts::new(self.name, self.help)
            .namespace(NAMESPACE)
            .subsystem(self.subsystem)
    }

    pub fn desc(&self) -> prometheus::Result<Desc> {
        Desc::new(
            self.fq_name(),
            self.help.to_string(),
            self.labels.iter().map(|l| l.to_string()).collect(),
            HashMap::new(),
        )
    }
}

const HOST: &[&str] = &["host"];
const JAIL_HOST: &[&str] = &["jail", "host"];

pub static SERVER_UP: MetricDef = MetricDef {
    subsystem: "",
    name: "up",
    help: "Check if the fail2ban server is up",
    labels: HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_COUNT: MetricDef = MetricDef {
    subsystem: "",
    name: "jail_count",
    help: "Number of defined jails",
    labels: HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_FAILED_CURRENT: MetricDef = MetricDef {
    subsystem: "",
    name: "jail_failed_current",
    help: "Number of current failures on this jail's filter",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_FAILED_TOTAL: MetricDef = MetricDef {
    subsystem: "",
    name: "jail_failed_total",
    help: "Number of total failures on this jail's filter",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_BANNED_CURRENT: MetricDef = MetricDef {
    subsystem: "",
    name: "jail_banned_current",
    help: "Number of IPs currently banned in this jail",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_BANNED_TOTAL: MetricDef = MetricDef {
    subsystem: "",
    name: "jail_banned_total",
    help: "Total number of IPs banned by this jail (includes expired bans)",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_BAN_TIME: MetricDef = MetricDef {
    subsystem: "config",
    name: "jail_ban_time",
    help: "How long an IP is banned for in this jail (in seconds)",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_FIND_TIME: MetricDef = MetricDef {
    subsystem: "config",
    name: "jail_find_time",
    help: "How far back will the filter look for failures in this jail (in seconds)",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static JAIL_MAX_RETRIES: MetricDef = MetricDef {
    subsystem: "config",
    name: "jail_max_retries",
    help: "The number of failures allowed until the IP is banned by this jail",
    labels: JAIL_HOST,
    kind: MetricKind::Gauge,
};

pub static BANNED_IP: MetricDef = MetricDef {
    subsystem: "",
    name: "banned_ip",
    help: "Currently banned IP address (value is always 1)",
    labels: &[
        "jail",
        "address",
        "host",
        "city",
        "latitude",
        "longitude",
        "country",
        "country_code",
    ],
    kind: MetricKind::Gauge,
};

pub static VERSION_INFO: MetricDef = MetricDef {
    subsystem: "",
    name: "version",
    help: "Version of the exporter and fail2ban server",
    labels: &["exporter", "server", "host"],
    kind: MetricKind::Gauge,
};

pub static ERRORS: MetricDef = MetricDef {
    subsystem: "",
    name: "errors",
    help: "Number of errors found since startup",
    labels: &["type", "host"],
    kind: MetricKind::Counter,
};

/// Metrics announced by `describe`.
///
/// The config gauges and the version metric are emitted but not announced.
pub static DESCRIBED: [&MetricDef; 8] = [
    &SERVER_UP,
    &JAIL_COUNT,
    &JAIL_FAILED_CURRENT,
    &JAIL_FAILED_TOTAL,
    &JAIL_BANNED_CURRENT,
    &JAIL_BANNED_TOTAL,
    &ERRORS,
    &BANNED_IP,
];

/// One emitted observation. `labels` follow `metric.labels` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: &'static MetricDef,
    pub labels: Vec<String>,
    pub value: f64,
}

/// Receiver of samples produced by a scrape.
pub trait SampleSink {
    fn emit(&mut self, sample: Sample);
}

impl SampleSink for Vec<Sample> {
    fn emit(&mut self, sample: Sample) {
        self.push(sample);
    }
}

enum FamilyVec {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

/// Builds Prometheus metric families from samples, one family per metric.
#[derive(Default)]
pub struct FamilySink {
    families: Vec<(&'static str, FamilyVec)>,
}

impl FamilySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn family(&mut self, metric: &'static MetricDef) -> prometheus::Result<&FamilyVec> {
        let pos = match self.families.iter().position(|(name, _)| *name == metric.name) {
            Some(pos) => pos,
            None => {
                let vec = match metric.kind {
                    MetricKind::Gauge => FamilyVec::Gauge(GaugeVec::new(metric.opts(), metric.labels)?),
                    MetricKind::Counter => {
                        FamilyVec::Counter(CounterVec::new(metric.opts(), metric.labels)?)
                    }
                };
                self.families.push((metric.name, vec));
                self.families.len() - 1
            }
        };
        Ok(&self.families[pos].1)
    }

    /// Consumes the sink, returning families in first-emission order.
    pub fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .flat_map(|(_, vec)| match vec {
                FamilyVec::Gauge(g) => g.collect(),
                FamilyVec::Counter(c) => c.collect(),
            })
            .filter(|mf| !mf.get_metric().is_empty())
            .collect()
    }
}

impl SampleSink for FamilySink {
    fn emit(&mut self, sample: Sample) {
        let labels: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
        let result = self.family(sample.metric).and_then(|family| match family {
            FamilyVec::Gauge(g) => g.get_metric_with_label_values(&labels).map(|m| m.set(sample.value)),
            FamilyVec::Counter(c) => c
                .get_metric_with_label_values(&labels)
                .map(|m| m.inc_by(sample.value)),
        });
        if let Err(e) = result {
            warn!(metric = %sample.metric.fq_name(), error = %e, "dropping sample");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn fq_names() {
        assert_eq!(SERVER_UP.fq_name(), "f2b_up");
        assert_eq!(JAIL_BAN_TIME.fq_name(), "f2b_config_jail_ban_time");
        assert_eq!(ERRORS.fq_name(), "f2b_errors");
    }

    #[test]
    fn described_descriptors_are_valid() {
        let names: Vec<String> = DESCRIBED
            .iter()
            .map(|m| m.desc().unwrap().fq_name)
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"f2b_banned_ip".to_string()));
        assert!(!names.contains(&"f2b_version".to_string()));
        assert!(!names.contains(&"f2b_config_jail_ban_time".to_string()));
    }

    #[test]
    fn family_sink_encodes_text() {
        let mut sink = FamilySink::new();
        sink.emit(Sample {
            metric: &SERVER_UP,
            labels: vec!["host1".into()],
            value: 1.0,
        });
        sink.emit(Sample {
            metric: &ERRORS,
            labels: vec!["socket_conn".into(), "host1".into()],
            value: 3.0,
        });
        // Wrong label arity is dropped, not fatal.
        sink.emit(Sample {
            metric: &JAIL_COUNT,
            labels: vec![],
            value: 2.0,
        });

        let families = sink.finish();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("# TYPE f2b_up gauge"));
        assert!(text.contains("f2b_up{host=\"host1\"} 1"));
        assert!(text.contains("# TYPE f2b_errors counter"));
        assert!(text.contains("f2b_errors{host=\"host1\",type=\"socket_conn\"} 3"));
        assert!(!text.contains("f2b_jail_count{"));
    }
}
