//! Geolocation enrichment of banned addresses.
//!
//! Enrichment is best-effort: an address that cannot be resolved yields no
//! labels and is never counted as an error. Configuration problems disable
//! geo-tagging for the whole run instead of aborting startup.

mod maxmind;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

pub use maxmind::MaxMindEnricher;

/// Geo label names in emission order.
pub const GEO_LABELS: [&str; 5] = ["city", "latitude", "longitude", "country", "country_code"];

/// Labels resolved for one address, keyed by label name.
pub type GeoLabels = BTreeMap<&'static str, String>;

/// Source of geo labels for an address.
///
/// Implementations only populate names returned by `labels`; the collector
/// drops anything else. `None` is the only "nothing resolved" signal and
/// lookups never fail loudly.
pub trait GeoEnricher: Send + Sync {
    fn annotate(&self, address: &str) -> Option<GeoLabels>;

    /// Label names this enricher may populate, in order.
    fn labels(&self) -> &'static [&'static str];
}

/// Null enricher used when geo-tagging is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeo;

impl GeoEnricher for NoGeo {
    fn annotate(&self, _address: &str) -> Option<GeoLabels> {
        None
    }

    fn labels(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Flattens an optional annotation into the fixed five-label tuple.
///
/// Unresolved positions become empty strings so label cardinality is stable.
pub fn flatten(labels: Option<&GeoLabels>) -> [String; 5] {
    GEO_LABELS.map(|name| {
        labels
            .and_then(|l| l.get(name))
            .cloned()
            .unwrap_or_default()
    })
}

/// Supported geolocation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoProvider {
    MaxMind,
}

impl FromStr for GeoProvider {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maxmind" => Ok(GeoProvider::MaxMind),
            other => Err(GeoError::UnknownProvider(other.to_string())),
        }
    }
}

/// Geo-tagging configuration.
#[derive(Debug, Clone, Default)]
pub struct GeoSettings {
    pub enabled: bool,
    /// Provider name as given on the command line.
    pub provider: String,
    pub db_path: Option<PathBuf>,
}

/// Error building an enricher from settings.
#[derive(Debug)]
pub enum GeoError {
    Disabled,
    MissingPath,
    UnknownProvider(String),
    Open(PathBuf, maxminddb::MaxMindDBError),
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::Disabled => write!(f, "geo-tagging disabled"),
            GeoError::MissingPath => write!(f, "geo-tagging enabled but no database path provided"),
            GeoError::UnknownProvider(name) => write!(f, "unknown geo provider: {}", name),
            GeoError::Open(path, e) => {
                write!(f, "failed to open MaxMind database at {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for GeoError {}

/// Builds the configured enricher.
pub fn build_enricher(settings: &GeoSettings) -> Result<Box<dyn GeoEnricher>, GeoError> {
    if !settings.enabled {
        return Err(GeoError::Disabled);
    }
    let provider: GeoProvider = settings.provider.parse()?;
    let path = settings.db_path.as_ref().ok_or(GeoError::MissingPath)?;
    match provider {
        GeoProvider::MaxMind => Ok(Box::new(MaxMindEnricher::open(path)?)),
    }
}

/// Like `build_enricher`, but logs configuration problems and returns `None`.
pub fn enricher_from_settings(settings: &GeoSettings) -> Option<Box<dyn GeoEnricher>> {
    match build_enricher(settings) {
        Ok(enricher) => {
            info!(
                provider = %settings.provider,
                path = ?settings.db_path,
                "geo-tagging enabled"
            );
            Some(enricher)
        }
        Err(GeoError::Disabled) => None,
        Err(e) => {
            warn!(error = %e, "geo-tagging disabled");
            None
        }
    }
}
