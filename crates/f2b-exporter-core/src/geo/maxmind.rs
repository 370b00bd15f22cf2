//! MaxMind GeoIP2/GeoLite2 City database enricher.

use std::net::IpAddr;
use std::path::Path;

use maxminddb::{Reader, geoip2};
use tracing::debug;

use super::{GEO_LABELS, GeoEnricher, GeoError, GeoLabels};

/// Enricher backed by an opened MaxMind database.
///
/// The reader is immutable after opening, so lookups are safe from
/// overlapping scrapes.
pub struct MaxMindEnricher {
    reader: Reader<Vec<u8>>,
}

impl MaxMindEnricher {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader =
            Reader::open_readfile(path).map_err(|e| GeoError::Open(path.to_path_buf(), e))?;
        debug!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "MaxMind database opened"
        );
        Ok(Self { reader })
    }
}

impl GeoEnricher for MaxMindEnricher {
    fn annotate(&self, address: &str) -> Option<GeoLabels> {
        let ip: IpAddr = match address.parse() {
            Ok(ip) => ip,
            Err(_) => {
                debug!(address, "invalid IP address, skipping geo lookup");
                return None;
            }
        };

        let city: geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(e) => {
                debug!(address, error = %e, "geo lookup failed");
                return None;
            }
        };

        let location = city.location.as_ref();
        GeoRecord {
            city: city
                .city
                .as_ref()
                .and_then(|c| c.names.as_ref())
                .and_then(|n| n.get("en").copied()),
            latitude: location.and_then(|l| l.latitude).unwrap_or(0.0),
            longitude: location.and_then(|l| l.longitude).unwrap_or(0.0),
            country: city
                .country
                .as_ref()
                .and_then(|c| c.names.as_ref())
                .and_then(|n| n.get("en").copied()),
            country_code: city.country.as_ref().and_then(|c| c.iso_code),
        }
        .into_labels()
    }

    fn labels(&self) -> &'static [&'static str] {
        &GEO_LABELS
    }
}

/// Fields of a city record that map onto geo labels.
#[derive(Debug, Default)]
struct GeoRecord<'a> {
    city: Option<&'a str>,
    latitude: f64,
    longitude: f64,
    country: Option<&'a str>,
    country_code: Option<&'a str>,
}

impl GeoRecord<'_> {
    /// Converts the record into labels; `None` when nothing usable was found.
    ///
    /// Coordinates are emitted as a pair, and only when not both zero.
    fn into_labels(self) -> Option<GeoLabels> {
        let mut labels = GeoLabels::new();

        if let Some(city) = self.city.filter(|c| !c.is_empty()) {
            labels.insert("city", city.to_string());
        }
        if self.latitude != 0.0 || self.longitude != 0.0 {
            labels.insert("latitude", format!("{:.6}", self.latitude));
            labels.insert("longitude", format!("{:.6}", self.longitude));
        }
        if let Some(country) = self.country.filter(|c| !c.is_empty()) {
            labels.insert("country", country.to_string());
        }
        if let Some(code) = self.country_code.filter(|c| !c.is_empty()) {
            labels.insert("country_code", code.to_string());
        }

        if labels.is_empty() { None } else { Some(labels) }
    }
}
